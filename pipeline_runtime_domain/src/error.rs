// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Error System
//!
//! This module provides the hierarchical error system for the pipeline
//! runtime core. It categorizes failures into configuration, precondition,
//! policy-violation, step-failure, backend-fault, and bus-fault errors, each
//! carrying an actionable message.
//!
//! ## Error Categories
//!
//! - **Configuration**: fatal at startup (missing order artifact, unknown
//!   mapping enum, resolver validation failure).
//! - **Precondition**: fatal before execution begins (unsupported reactive
//!   value, `UNSAFE` or `STRICT_REQUIRED` step under a parallel policy).
//! - **PolicyViolation**: surfaced on the reactive value (`REQUIRE_CACHE`
//!   with no resolvable key, or a miss).
//! - **StepFailure**: propagated unchanged from a step body.
//! - **BackendFault**: cache I/O or (de)serialization fault; logged and
//!   treated as a miss/no-op by the cache layer, never surfaced in place of
//!   a step's own error.
//! - **BusFault**: a subscriber is closed or the bus buffer is full under the
//!   `FAIL` overflow policy.

use thiserror::Error;

/// Deterministic validation error codes produced by the runtime placement
/// resolver (C8). Each code names the offending id(s) in its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverErrorCode {
    UnknownStep,
    UnknownModule,
    UnknownRuntime,
    DuplicateStep,
    MissingStep,
    SyntheticAmbiguous,
    MonolithSplit,
    PipelineSplit,
}

impl ResolverErrorCode {
    /// The stable string code, e.g. `RUNTIME_MAP_UNKNOWN_STEP`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownStep => "RUNTIME_MAP_UNKNOWN_STEP",
            Self::UnknownModule => "RUNTIME_MAP_UNKNOWN_MODULE",
            Self::UnknownRuntime => "RUNTIME_MAP_UNKNOWN_RUNTIME",
            Self::DuplicateStep => "RUNTIME_MAP_DUPLICATE_STEP",
            Self::MissingStep => "RUNTIME_MAP_MISSING_STEP",
            Self::SyntheticAmbiguous => "RUNTIME_MAP_SYNTHETIC_AMBIGUOUS",
            Self::MonolithSplit => "RUNTIME_MAP_MONOLITH_SPLIT",
            Self::PipelineSplit => "RUNTIME_MAP_PIPELINE_SPLIT",
        }
    }
}

impl std::fmt::Display for ResolverErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Domain-specific errors for the pipeline runtime core.
///
/// Every variant is actionable: it carries enough context (ids, the
/// offending value, or the underlying cause) to diagnose the failure
/// without re-deriving it from logs.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("cache policy violation: {0}")]
    CachePolicyViolation(String),

    #[error("step '{step}' failed: {source}")]
    StepFailure { step: String, source: String },

    #[error("cache backend fault: {0}")]
    BackendFault(String),

    #[error("output bus fault: {0}")]
    BusFault(String),

    #[error("[{code}] {message}")]
    ResolverValidation { code: ResolverErrorCode, message: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("io error: {0}")]
    IoError(String),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn cache_policy_violation(msg: impl Into<String>) -> Self {
        Self::CachePolicyViolation(msg.into())
    }

    pub fn step_failure(step: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::StepFailure {
            step: step.into(),
            source: source.to_string(),
        }
    }

    pub fn backend_fault(msg: impl Into<String>) -> Self {
        Self::BackendFault(msg.into())
    }

    pub fn bus_fault(msg: impl Into<String>) -> Self {
        Self::BusFault(msg.into())
    }

    pub fn resolver(code: ResolverErrorCode, message: impl Into<String>) -> Self {
        Self::ResolverValidation {
            code,
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Mirrors the reference implementation's recoverability classification:
    /// transient infrastructure faults are recoverable, everything that
    /// reflects a structural mistake (bad config, a step's own bug) is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BackendFault(_) | Self::BusFault(_) | Self::IoError(_))
    }

    /// The high-level category used for logging and exit-code mapping.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Precondition(_) => "precondition",
            Self::CachePolicyViolation(_) => "policy_violation",
            Self::StepFailure { .. } => "step_failure",
            Self::BackendFault(_) => "backend_fault",
            Self::BusFault(_) => "bus_fault",
            Self::ResolverValidation { .. } => "resolver_validation",
            Self::Cancelled(_) => "cancelled",
            Self::SerializationError(_) => "serialization",
            Self::IoError(_) => "io",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Substring a mapping document's duplicate-key deserializer embeds in its
/// error message, recognized below to route the failure to
/// `ResolverErrorCode::DuplicateStep` instead of a generic `Configuration`
/// error.
pub const DUPLICATE_STEP_MARKER: &str = "duplicate step key";

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        let message = err.to_string();
        if message.contains(DUPLICATE_STEP_MARKER) {
            return Self::ResolverValidation {
                code: ResolverErrorCode::DuplicateStep,
                message,
            };
        }
        Self::Configuration(format!("invalid YAML: {message}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(format!("invalid JSON: {err}"))
    }
}

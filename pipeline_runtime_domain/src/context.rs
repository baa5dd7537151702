// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Context
//!
//! `PipelineContext` is the immutable per-invocation tuple threaded through
//! one step application: an optional version tag (used to prefix cache
//! keys, see [`crate::cache::CacheKey::resolve`]), an optional override of
//! the effective cache key, and an optional override of the effective
//! `CachePolicy`. The scope that binds a `PipelineContext` to the task
//! currently executing a step (C1) is a runtime concern - it needs
//! `tokio::task_local!`, which lives in `pipeline-runtime` - this crate only
//! defines the value being scoped.

use crate::cache::CachePolicy;

/// Immutable per-invocation context, re-bound by the runner around every
/// step application (§4.1).
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub version_tag: Option<String>,
    pub cache_key_override: Option<String>,
    pub cache_policy: Option<CachePolicy>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = Some(tag.into());
        self
    }

    pub fn with_cache_key_override(mut self, key: impl Into<String>) -> Self {
        self.cache_key_override = Some(key.into());
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Resolves the effective policy: the context override takes precedence
    /// over the step/runner's configured default (§4.3 step 1).
    pub fn effective_policy(&self, configured_default: CachePolicy) -> CachePolicy {
        self.cache_policy.unwrap_or(configured_default)
    }
}

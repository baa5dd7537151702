// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Mapping Data Model (C8)
//!
//! Pure data types for the runtime placement resolver's mapping file. The
//! YAML parsing, resolution algorithm, validation, and locator live in
//! `pipeline-runtime` (they depend on `serde_yaml`, a serialization-format
//! choice this crate's architecture keeps out of the domain layer); this
//! module only fixes the shape of the parsed document and its defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::aspect::SyntheticId;
use crate::step::StepId;

/// Gross placement topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    Modular,
    PipelineRuntime,
    Monolith,
}

impl Default for Layout {
    fn default() -> Self {
        Self::Modular
    }
}

/// Strictness of resolver validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    Auto,
    Strict,
}

impl Default for Validation {
    fn default() -> Self {
        Self::Auto
    }
}

/// Default module-placement policy for steps without an explicit `steps`
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleDefault {
    /// One module per step, named after the step id.
    PerStep,
    /// A single shared module, named by the sole declared module.
    Shared,
    /// An explicit module name.
    Named(String),
}

impl ModuleDefault {
    pub fn parse(value: &str) -> Self {
        match value {
            "per-step" => Self::PerStep,
            "shared" => Self::Shared,
            other => Self::Named(other.to_string()),
        }
    }
}

/// Default module-placement policy for synthetics without an explicit
/// `synthetics` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticModuleDefault {
    /// Hosted by a conceptual plugin module.
    Plugin,
    /// One module per synthetic, named after the synthetic id.
    PerStep,
    Named(String),
}

impl SyntheticModuleDefault {
    pub fn parse(value: &str) -> Self {
        match value {
            "plugin" => Self::Plugin,
            "per-step" => Self::PerStep,
            other => Self::Named(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Defaults {
    pub runtime: String,
    pub module: ModuleDefault,
    pub synthetic_module: SyntheticModuleDefault,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            runtime: "default".to_string(),
            module: ModuleDefault::PerStep,
            synthetic_module: SyntheticModuleDefault::Plugin,
        }
    }
}

/// The fully parsed runtime mapping document (§6).
#[derive(Debug, Clone)]
pub struct RuntimeMapping {
    pub version: u32,
    pub layout: Layout,
    pub validation: Validation,
    pub defaults: Defaults,
    pub runtimes: Vec<String>,
    pub modules: HashMap<String, String>,
    pub steps: HashMap<StepId, String>,
    pub synthetics: HashMap<String, String>,
}

impl Default for RuntimeMapping {
    fn default() -> Self {
        Self {
            version: 1,
            layout: Layout::default(),
            validation: Validation::default(),
            defaults: Defaults::default(),
            runtimes: Vec::new(),
            modules: HashMap::new(),
            steps: HashMap::new(),
            synthetics: HashMap::new(),
        }
    }
}

/// Where a resolved call lands relative to the current process: in the same
/// module (in-process) or a different one (network-bound, handled by an
/// out-of-scope transport adapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLocality {
    InProcess,
    NetworkBound,
}

/// Resolution result for a single step or synthetic: which module hosts it,
/// which runtime that module runs on, and whether invoking it from the
/// current process is in-process or network-bound.
#[derive(Debug, Clone)]
pub struct Placement {
    pub module: String,
    pub runtime: String,
    pub locality: CallLocality,
}

/// A resolved synthetic's id, retained alongside its placement so resolver
/// diagnostics can name it precisely.
#[derive(Debug, Clone)]
pub struct SyntheticPlacement {
    pub id: SyntheticId,
    pub placement: Placement,
}

// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Configuration (§4.9.3)
//!
//! Layered configuration for a runner process, built on the `config` crate.
//! Sources apply in increasing priority: compiled-in defaults, an optional
//! config file (TOML or YAML, `config` crate picks the format off the
//! extension), environment variables prefixed `PIPELINE_` (double
//! underscore as the nesting separator, e.g. `PIPELINE_CACHE__DEFAULT_POLICY`),
//! then explicit CLI overrides applied by the bootstrap crate after load.
//!
//! ## Example file
//!
//! ```toml
//! [cache]
//! default_policy = "CACHE_ONLY"
//! backend = "in-memory"
//! key_generator = "decimal"
//!
//! [executor]
//! max_concurrency = 8
//! parallelism_default = "auto"
//!
//! [resolver]
//! mapping_path = "config/runtime-mapping.yaml"
//! validation = "auto"
//!
//! [log]
//! level = "info"
//! format = "pretty"
//!
//! [metrics]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};

use pipeline_runtime_domain::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_policy: String,
    pub backend: String,
    /// Name of the registered `CacheKeyStrategy` to prefer during key
    /// resolution (§4.3, §4.9.3). Blank means no preference - strategies are
    /// tried in target-match-then-priority order.
    pub key_generator: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_policy: "CACHE_ONLY".to_string(),
            backend: "in-memory".to_string(),
            key_generator: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
    pub parallelism_default: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            parallelism_default: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub mapping_path: Option<String>,
    pub validation: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mapping_path: None,
            validation: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Root runtime configuration, assembled by [`RuntimeConfig::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub executor: ExecutorConfig,
    pub resolver: ResolverConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            executor: ExecutorConfig::default(),
            resolver: ResolverConfig::default(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from compiled-in defaults, an optional file, and
    /// `PIPELINE_`-prefixed environment variables, in that priority order.
    pub fn load(config_path: Option<&str>) -> Result<Self, PipelineError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(config::Environment::with_prefix("PIPELINE").separator("__"));

        let raw = builder
            .build()
            .map_err(|e| PipelineError::configuration(format!("failed to load runtime configuration: {e}")))?;

        raw.try_deserialize()
            .map_err(|e| PipelineError::configuration(format!("failed to parse runtime configuration: {e}")))
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        PipelineError::configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = RuntimeConfig::load(None).unwrap();
        assert_eq!(cfg.cache.default_policy, "CACHE_ONLY");
        assert_eq!(cfg.executor.max_concurrency, 4);
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Configuration
//!
//! Loads [`RuntimeConfig`] through the layering described in the
//! `pipeline-runtime` crate, then applies the last, highest-priority layer:
//! explicit CLI flags validated by [`crate::cli`].

use pipeline_runtime::infrastructure::config::RuntimeConfig;

use crate::cli::ValidatedCli;

/// Loads the runtime configuration and folds in CLI overrides.
pub fn load(cli: &ValidatedCli) -> Result<RuntimeConfig, pipeline_runtime_domain::error::PipelineError> {
    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let mut config = RuntimeConfig::load(config_path.as_deref())?;

    if cli.verbose {
        config.log.level = "debug".to_string();
    }
    if let Some(ref policy) = cli.parallelism {
        config.executor.parallelism_default = policy.clone();
    }
    if let Some(max_concurrency) = cli.max_concurrency {
        config.executor.max_concurrency = max_concurrency;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ValidatedCommand;

    fn cli(verbose: bool, parallelism: Option<&str>, max_concurrency: Option<usize>) -> ValidatedCli {
        ValidatedCli {
            command: ValidatedCommand::Platform,
            verbose,
            config: None,
            parallelism: parallelism.map(str::to_string),
            max_concurrency,
        }
    }

    #[test]
    fn verbose_flag_raises_log_level_to_debug() {
        let loaded = load(&cli(true, None, None)).unwrap();
        assert_eq!(loaded.log.level, "debug");
    }

    #[test]
    fn cli_overrides_take_priority_over_file_defaults() {
        let loaded = load(&cli(false, Some("sequential"), Some(16))).unwrap();
        assert_eq!(loaded.executor.parallelism_default, "sequential");
        assert_eq!(loaded.executor.max_concurrency, 16);
    }
}

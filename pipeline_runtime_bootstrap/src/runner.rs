// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Composition Root
//!
//! Wires the `pipeline-runtime` crate's C1-C8 components from a
//! [`ValidatedCli`] and a layered [`RuntimeConfig`], then dispatches to the
//! behavior the chosen subcommand asks for.
//!
//! This crate hosts no business steps of its own - step instances are
//! supplied by an embedding application (plugin discovery is explicitly out
//! of scope, §1). `run` therefore resolves the placement topology for the
//! steps named in the canonical order artifact and reports the plan; an
//! embedding application calls `pipeline_runtime::runtime::runner::PipelineRunner::run`
//! directly with its own step instances once this composition root has
//! validated configuration and wiring.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pipeline_runtime::infrastructure::config::RuntimeConfig;
use pipeline_runtime::infrastructure::logging;
use pipeline_runtime::runtime::cache_layer::{CacheReadWriteLayer, InMemoryCacheBackend, KeyStrategyRegistry};
use pipeline_runtime::runtime::classifier::ParallelismPolicy;
use pipeline_runtime::runtime::executor::{CacheCodecRegistry, StepExecutor};
use pipeline_runtime::runtime::resolver::{load_mapping, Resolver};
use pipeline_runtime::runtime::runner::CanonicalOrder;
use pipeline_runtime_domain::cache::CachePolicy;
use pipeline_runtime_domain::error::PipelineError;
use pipeline_runtime_domain::step::StepId;
use pipeline_runtime_domain::telemetry::NoopTelemetry;

use crate::cli::{ValidatedCli, ValidatedCommand};
use crate::logger::{BootstrapLogger, ConsoleLogger};
use crate::platform::{create_platform, Platform};
use crate::shutdown::ShutdownCoordinator;
use crate::{config, signals};

fn parse_parallelism(value: &str) -> ParallelismPolicy {
    match value.trim().to_ascii_lowercase().as_str() {
        "sequential" => ParallelismPolicy::Sequential,
        "parallel" => ParallelismPolicy::Parallel,
        "auto" => ParallelismPolicy::Auto,
        other => {
            tracing::warn!(value = other, "unknown parallelism policy, defaulting to AUTO");
            ParallelismPolicy::Auto
        }
    }
}

/// Builds the executor/cache stack shared by every subcommand.
fn build_executor(cfg: &RuntimeConfig) -> (StepExecutor, CachePolicy) {
    let (policy, recognized) = CachePolicy::from_config(&cfg.cache.default_policy);
    if !recognized {
        tracing::warn!(value = %cfg.cache.default_policy, "unrecognized cache policy, defaulting to CACHE_ONLY");
    }

    let mut cache_layer = CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), KeyStrategyRegistry::new());
    if !cfg.cache.key_generator.trim().is_empty() {
        cache_layer = cache_layer.with_key_generator(cfg.cache.key_generator.trim().to_string());
    }

    let cache = Arc::new(cache_layer);
    let executor = StepExecutor::new(cache, CacheCodecRegistry::new(), Arc::new(NoopTelemetry)).with_cache_default(policy);
    (executor, policy)
}

fn resolve_topology(mapping_path: Option<&PathBuf>, step_ids: &[StepId]) -> Result<(), PipelineError> {
    let mapping = load_mapping(mapping_path.map(|p| p.as_path()))?;
    let resolver = Resolver::new(mapping);
    let topology = resolver.resolve(step_ids, &[])?;

    for (id, placement) in &topology.steps {
        tracing::info!(
            step = id.as_str(),
            module = placement.module.as_str(),
            runtime = placement.runtime.as_str(),
            locality = ?placement.locality,
            "resolved step placement"
        );
    }
    Ok(())
}

/// Runs `order`/`mapping` through configuration loading, logging
/// initialization, and placement resolution, reporting the resolved
/// execution plan. Installs signal handling for the duration of the
/// resolution so a future streaming run sees a coordinator already wired.
///
/// Configuration loading happens before `logging::init_logging` installs the
/// structured subscriber, so failures in this window are reported through
/// `logger` rather than `tracing` - there would be no subscriber listening.
async fn run_command(
    cli: &ValidatedCli,
    logger: &dyn BootstrapLogger,
    order: &PathBuf,
    mapping: Option<&PathBuf>,
    grace_period_secs: u64,
) -> Result<(), PipelineError> {
    logger.info("loading runtime configuration");
    let cfg = config::load(cli).inspect_err(|e| logger.error(&format!("failed to load runtime configuration: {e}")))?;
    logging::init_logging(&cfg.log.level, cfg.log.format);

    let run_id = ulid::Ulid::new();
    let _root = logging::root_span(&run_id).entered();

    let coordinator = ShutdownCoordinator::new(Duration::from_secs(grace_period_secs));
    signals::install(coordinator.clone());

    let policy = cli
        .parallelism
        .as_deref()
        .map(parse_parallelism)
        .unwrap_or_else(|| parse_parallelism(&cfg.executor.parallelism_default));
    let max_concurrency = cli.max_concurrency.unwrap_or(cfg.executor.max_concurrency);
    let (_executor, _cache_policy) = build_executor(&cfg);

    tracing::info!(?policy, max_concurrency, "composed pipeline runner");

    let text = std::fs::read_to_string(order).map_err(|e| {
        let message = format!("cannot read canonical order artifact: {e}");
        logger.error(&message);
        PipelineError::configuration(message)
    })?;
    let canonical = CanonicalOrder::from_json(&text)?;
    let step_ids: Vec<StepId> = canonical.steps().iter().map(|s| StepId::new(s.clone())).collect();

    let mapping_path = mapping.cloned();
    resolve_topology(mapping_path.as_ref(), &step_ids)?;

    if coordinator.is_shutting_down() {
        logger.warn("shutdown requested during startup");
        return Err(PipelineError::Cancelled("shutdown requested during startup".to_string()));
    }

    Ok(())
}

fn validate_mapping_command(logger: &dyn BootstrapLogger, mapping: &PathBuf) -> Result<(), PipelineError> {
    logger.info(&format!("validating runtime mapping at {}", mapping.display()));
    let parsed = load_mapping(Some(mapping.as_path())).inspect_err(|e| logger.error(&format!("runtime mapping failed to parse: {e}")))?;
    let step_ids: Vec<StepId> = parsed.steps.keys().cloned().collect();
    let resolver = Resolver::new(parsed);
    let topology = resolver
        .resolve(&step_ids, &[])
        .inspect_err(|e| logger.error(&format!("runtime mapping is not internally consistent: {e}")))?;

    tracing::info!(
        steps = topology.steps.len(),
        synthetics = topology.synthetics.len(),
        "runtime mapping is internally consistent"
    );
    Ok(())
}

fn platform_command(logger: &dyn BootstrapLogger) -> Result<(), PipelineError> {
    logger.info("reporting platform capabilities");
    let platform = create_platform();
    println!("platform: {}", platform.platform_name());
    println!("cpu-count: {}", platform.cpu_count());
    println!("page-size: {}", platform.page_size());
    println!("elevated: {}", platform.is_elevated());
    Ok(())
}

/// Dispatches a validated CLI invocation to its composed behavior, logging
/// through a freshly-constructed [`ConsoleLogger`]. See [`run_with_logger`]
/// to inject a different [`BootstrapLogger`] (tests use `CapturingLogger`).
pub async fn run(cli: ValidatedCli) -> Result<(), PipelineError> {
    run_with_logger(cli, &ConsoleLogger::new()).await
}

/// Dispatches a validated CLI invocation to its composed behavior through the
/// given bootstrap logger.
pub async fn run_with_logger(cli: ValidatedCli, logger: &dyn BootstrapLogger) -> Result<(), PipelineError> {
    match &cli.command {
        ValidatedCommand::Run {
            order,
            mapping,
            grace_period_secs,
        } => {
            logger.info("dispatching run command");
            run_command(&cli, logger, order, mapping.as_ref(), *grace_period_secs).await
        }
        ValidatedCommand::ValidateMapping { mapping } => {
            logger.info("dispatching validate-mapping command");
            validate_mapping_command(logger, mapping)
        }
        ValidatedCommand::Platform => {
            logger.info("dispatching platform command");
            platform_command(logger)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_parallelism_values() {
        assert_eq!(parse_parallelism("sequential"), ParallelismPolicy::Sequential);
        assert_eq!(parse_parallelism("PARALLEL"), ParallelismPolicy::Parallel);
        assert_eq!(parse_parallelism("auto"), ParallelismPolicy::Auto);
    }

    #[test]
    fn unknown_parallelism_value_defaults_to_auto() {
        assert_eq!(parse_parallelism("bogus"), ParallelismPolicy::Auto);
    }

    #[tokio::test]
    async fn platform_command_reports_without_error() {
        platform_command(&crate::logger::NoOpLogger::new()).unwrap();
    }

    #[test]
    fn validate_mapping_rejects_unknown_module_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.runtime.yaml");
        std::fs::write(
            &path,
            r#"
            version: 1
            layout: modular
            validation: auto
            modules:
              m1: { runtime: default }
            steps:
              a: { module: ghost-module }
            "#,
        )
        .unwrap();

        let logger = crate::logger::CapturingLogger::new();
        let result = validate_mapping_command(&logger, &path);
        assert!(result.is_err());
        assert!(logger.messages().iter().any(|m| m.level == crate::logger::LogLevel::Error));
    }

    #[test]
    fn validate_mapping_accepts_a_consistent_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.runtime.yaml");
        std::fs::write(
            &path,
            r#"
            version: 1
            layout: modular
            validation: auto
            runtimes: [default]
            modules:
              m1: { runtime: default }
            steps:
              a: { module: m1 }
            "#,
        )
        .unwrap();

        let logger = crate::logger::CapturingLogger::new();
        validate_mapping_command(&logger, &path).unwrap();
        assert!(logger.messages().iter().all(|m| m.level != crate::logger::LogLevel::Error));
    }
}

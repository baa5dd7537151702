// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # CLI Structure
//!
//! `clap`-derived argument definitions for the bootstrap entry point. Kept
//! separate from [`super::validator`] so the structure of the CLI (what
//! flags exist) stays independent of the security validation applied to
//! their values.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pipeline runtime command-line entry point.
#[derive(Parser, Debug)]
#[command(name = "pipeline-runtime", version, about = "Runs a configured pipeline over a reactive source")]
pub struct Cli {
    /// Path to a layered configuration file (TOML or YAML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging, overriding the configured log level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the global parallelism policy (sequential | auto).
    #[arg(long, global = true)]
    pub parallelism: Option<String>,

    /// Override the maximum concurrency the classifier may grant a step.
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a pipeline: load the canonical step order, resolve runtime
    /// placement, and execute.
    Run {
        /// Path to the canonical order artifact (`{"order": [...]}`).
        #[arg(long)]
        order: PathBuf,

        /// Path to the runtime mapping file. Falls back to the locator
        /// algorithm, then to built-in defaults, when omitted.
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Grace period, in seconds, allowed for in-flight work to finish
        /// after a shutdown signal.
        #[arg(long, default_value_t = 5)]
        grace_period_secs: u64,
    },

    /// Validate a runtime mapping file without running a pipeline.
    ValidateMapping {
        /// Path to the runtime mapping file.
        #[arg(long)]
        mapping: PathBuf,
    },

    /// Print the resolved platform metadata (CPU count, page size, ...).
    Platform,
}

/// Parses process arguments into a [`Cli`]. A thin wrapper over
/// `Cli::parse()` so callers needn't depend on `clap` directly.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

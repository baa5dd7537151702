// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! Bootstrap-layer CLI handling with security-first design.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  1. parser::parse()                 │  Parse CLI with clap
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  2. validator::validate()           │  Security validation
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  3. ValidatedCli                    │  Safe, validated config
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `parser` - CLI structure and clap parsing
//! - `validator` - Security validation layer

pub mod parser;
pub mod validator;

pub use parser::{parse_cli, Cli, Commands};
pub use validator::{ParseError, SecureArgParser};

use std::path::PathBuf;

/// Validated CLI configuration
///
/// This structure holds all CLI arguments after security validation.
/// All paths are canonicalized and all values are range-checked.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub command: ValidatedCommand,
    pub verbose: bool,
    pub config: Option<PathBuf>,
    pub parallelism: Option<String>,
    pub max_concurrency: Option<usize>,
}

/// Validated command variants
#[derive(Debug, Clone)]
pub enum ValidatedCommand {
    Run {
        order: PathBuf,
        mapping: Option<PathBuf>,
        grace_period_secs: u64,
    },
    ValidateMapping {
        mapping: PathBuf,
    },
    Platform,
}

/// Parse and validate CLI arguments
///
/// This function combines parsing and validation:
/// 1. Parse CLI with clap
/// 2. Validate all paths with SecureArgParser
/// 3. Validate all numeric values
/// 4. Return ValidatedCli on success
///
/// # Errors
///
/// Returns `ParseError` if any validation fails
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    let cli = parse_cli();
    validate_cli(cli)
}

/// Validate parsed CLI arguments
///
/// Applies security validation to all CLI arguments:
/// - Path canonicalization and security checks
/// - Numeric range validation
/// - String pattern validation
///
/// # Errors
///
/// Returns `ParseError` if any validation fails
fn validate_cli(cli: Cli) -> Result<ValidatedCli, ParseError> {
    let config = if let Some(ref path) = cli.config {
        Some(SecureArgParser::validate_path(&path.to_string_lossy())?)
    } else {
        None
    };

    if let Some(ref policy) = cli.parallelism {
        SecureArgParser::validate_argument(policy)?;
        if !matches!(policy.as_str(), "sequential" | "auto") {
            return Err(ParseError::InvalidValue {
                arg: "parallelism".to_string(),
                reason: "must be 'sequential' or 'auto'".to_string(),
            });
        }
    }

    if let Some(max_concurrency) = cli.max_concurrency {
        if max_concurrency == 0 {
            return Err(ParseError::InvalidValue {
                arg: "max-concurrency".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
    }

    let command = match cli.command {
        Commands::Run {
            order,
            mapping,
            grace_period_secs,
        } => {
            let validated_order = SecureArgParser::validate_path(&order.to_string_lossy())?;
            let validated_mapping = match mapping {
                Some(ref path) => Some(SecureArgParser::validate_path(&path.to_string_lossy())?),
                None => None,
            };
            ValidatedCommand::Run {
                order: validated_order,
                mapping: validated_mapping,
                grace_period_secs,
            }
        }
        Commands::ValidateMapping { mapping } => {
            let validated_mapping = SecureArgParser::validate_path(&mapping.to_string_lossy())?;
            ValidatedCommand::ValidateMapping {
                mapping: validated_mapping,
            }
        }
        Commands::Platform => ValidatedCommand::Platform,
    };

    Ok(ValidatedCli {
        command,
        verbose: cli.verbose,
        config,
        parallelism: cli.parallelism,
        max_concurrency: cli.max_concurrency,
    })
}

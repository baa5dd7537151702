// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit Code Mapping
//!
//! Maps a [`PipelineError`]'s category (§4.9.2) to a Unix-style process exit
//! code (the `sysexits.h` conventions), so the shell and any supervising
//! process can distinguish a configuration mistake from a transient
//! infrastructure fault without parsing log output.

use pipeline_runtime_domain::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success.
    Ok = 0,
    /// Generic failure with no more specific category.
    Failure = 1,
    /// Configuration or resolver-validation error (`EX_CONFIG`).
    Config = 78,
    /// Invalid CLI argument or precondition violation (`EX_USAGE`).
    Usage = 64,
    /// I/O error reading an input artifact (`EX_IOERR`).
    IoError = 74,
    /// A step failed during execution.
    StepFailure = 70,
    /// The run was cancelled (e.g. by a shutdown signal) before completion.
    Cancelled = 130,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code as u8)
    }
}

/// Maps an error to the exit code that best describes its category.
pub fn map_error_to_exit_code(err: &PipelineError) -> ExitCode {
    match err {
        PipelineError::Configuration(_) | PipelineError::ResolverValidation { .. } => ExitCode::Config,
        PipelineError::Precondition(_) => ExitCode::Usage,
        PipelineError::IoError(_) => ExitCode::IoError,
        PipelineError::StepFailure { .. } => ExitCode::StepFailure,
        PipelineError::Cancelled(_) => ExitCode::Cancelled,
        PipelineError::CachePolicyViolation(_)
        | PipelineError::BackendFault(_)
        | PipelineError::BusFault(_)
        | PipelineError::SerializationError(_) => ExitCode::Failure,
    }
}

/// Converts a pipeline result into a process exit code, logging the error
/// (if any) at the appropriate level before returning.
pub fn result_to_exit_code(result: Result<(), PipelineError>) -> std::process::ExitCode {
    match result {
        Ok(()) => std::process::ExitCode::from(ExitCode::Ok),
        Err(e) => {
            tracing::error!(category = e.category(), "{e}");
            std::process::ExitCode::from(map_error_to_exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_map_to_ex_config() {
        assert_eq!(map_error_to_exit_code(&PipelineError::configuration("bad")), ExitCode::Config);
    }

    #[test]
    fn step_failures_map_to_their_own_code() {
        let err = PipelineError::step_failure("normalize", "boom");
        assert_eq!(map_error_to_exit_code(&err), ExitCode::StepFailure);
    }

    #[test]
    fn cancellation_maps_to_130() {
        assert_eq!(map_error_to_exit_code(&PipelineError::Cancelled("shutdown".to_string())), ExitCode::Cancelled);
        assert_eq!(ExitCode::Cancelled as u8, 130);
    }
}

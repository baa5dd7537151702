// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Validation Layer
//!
//! Applies security checks to raw CLI argument strings before they're
//! trusted by the rest of the bootstrap layer: path canonicalization and
//! existence checks for file arguments, and rejection of shell/control
//! characters for free-form string arguments.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while parsing or validating CLI arguments.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid value for --{arg}: {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("argument contains a disallowed character: {0:?}")]
    DisallowedCharacter(char),

    #[error("I/O error validating path: {0}")]
    Io(#[from] std::io::Error),
}

/// Characters that have no legitimate use in a pipeline argument and are
/// rejected outright: shell metacharacters and control characters.
const DISALLOWED: &[char] = &[';', '|', '&', '$', '`', '\n', '\r', '\0'];

pub struct SecureArgParser;

impl SecureArgParser {
    /// Validates a free-form string argument (step id, pipeline name, ...):
    /// rejects shell metacharacters and control characters.
    pub fn validate_argument(value: &str) -> Result<(), ParseError> {
        if let Some(c) = value.chars().find(|c| DISALLOWED.contains(c) || c.is_control()) {
            return Err(ParseError::DisallowedCharacter(c));
        }
        Ok(())
    }

    /// Validates a path that is expected to already exist: checks for
    /// disallowed characters, confirms the path exists, then canonicalizes
    /// it so later code never re-resolves a relative or symlinked path.
    pub fn validate_path(raw: &str) -> Result<PathBuf, ParseError> {
        Self::validate_argument(raw)?;
        let path = PathBuf::from(raw);
        if !path.exists() {
            return Err(ParseError::PathNotFound(path));
        }
        path.canonicalize().map_err(ParseError::Io)
    }
}

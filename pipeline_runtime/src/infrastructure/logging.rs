// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Structured Logging (§4.9.1)
//!
//! Initializes a global [`tracing`] subscriber for a runner process. Level
//! filtering is driven by `RUST_LOG` (falling back to the configured
//! `log.level`); format is either human-readable ("pretty", the default) or
//! newline-delimited JSON ("json") for log-aggregation pipelines.
//!
//! Every runner invocation opens a root span carrying a `run_id`; the runner
//! (C6) opens a child span per step so step-scoped log lines can be
//! correlated without threading an explicit logger handle through every
//! call.

use tracing_subscriber::EnvFilter;

use crate::infrastructure::config::LogFormat;

/// Initializes the global tracing subscriber. Safe to call at most once per
/// process; a second call is a logic error in the embedding application, not
/// something this crate defends against (tracing itself panics on double
/// init).
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match format {
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Opens the root span for one runner invocation, carrying the run's
/// identity so every nested step span inherits it.
pub fn root_span(run_id: &ulid::Ulid) -> tracing::Span {
    tracing::info_span!("pipeline_run", run_id = %run_id)
}

/// Opens a child span for a single step application within an active root
/// span.
pub fn step_span(step_id: &str, shape: &str) -> tracing::Span {
    tracing::info_span!("step", step_id, shape)
}

// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI and `make lint-strict`
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # Pipeline Runtime
//!
//! The infrastructure half of a streaming, cacheable pipeline framework: a
//! Step Executor that applies any of five step shapes to a reactive value,
//! a cache read/write layer sitting in front of a pluggable backend, a
//! parallelism classifier, a cooperative-task context scope, an in-memory
//! output bus, aspect expansion into synthetic steps, a pipeline runner that
//! walks a canonical step order, and a runtime placement resolver that maps
//! steps to deployment modules and runtimes.
//!
//! Pure types and traits (step shapes, reactive values, cache vocabulary,
//! errors, the runtime mapping data model) live in
//! `pipeline_runtime_domain`; this crate supplies the `tokio`-backed
//! implementations and the ambient stack (configuration, logging, metrics)
//! around them.
//!
//! ## Layout
//!
//! - [`runtime`] - the eight runner/resolver components (C1-C8)
//! - [`infrastructure::config`] - layered configuration via the `config`
//!   crate
//! - [`infrastructure::logging`] - structured logging via `tracing`
//! - [`infrastructure::metrics`] - Prometheus counters for the executor,
//!   cache layer, output bus, and resolver

pub mod infrastructure;
pub mod runtime;

// Tests are organized as:
// - Unit tests: #[cfg(test)] modules within each source file
// - Integration tests: separate files in tests/ directory

pub use pipeline_runtime_domain::cache::{CacheBackend, CacheEnvelope, CacheKey, CachePolicy, CacheStatus};
pub use pipeline_runtime_domain::context::PipelineContext;
pub use pipeline_runtime_domain::error::{PipelineError, ResolverErrorCode};
pub use pipeline_runtime_domain::mapping::RuntimeMapping;
pub use pipeline_runtime_domain::reactive::{CancellationToken, ReactiveValue, SingleAsync, StreamAsync};
pub use pipeline_runtime_domain::step::{DynItem, StepId, StepInstance, StepShape};

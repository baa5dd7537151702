// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime
//!
//! The eight components of the pipeline runner and runtime placement
//! resolver:
//!
//! - [`context_scope`] (C1) - task-local [`PipelineContext`] binding
//! - [`output_bus`] (C2) - process-wide publish/subscribe for live outputs
//! - [`cache_layer`] (C3) - cache key derivation, read/write-through
//! - [`classifier`] (C4) - per-step parallelism decision
//! - [`executor`] (C5) - dispatches one step of any of the five shapes
//! - [`runner`] (C6) - walks the canonical step order end to end
//! - [`aspects`] (C7) - expands declared aspects into synthetic steps
//! - [`resolver`] (C8) - maps steps and synthetics to modules and runtimes
//!
//! [`PipelineContext`]: pipeline_runtime_domain::context::PipelineContext

pub mod aspects;
pub mod cache_layer;
pub mod classifier;
pub mod context_scope;
pub mod executor;
pub mod output_bus;
pub mod resolver;
pub mod runner;

pub use aspects::{AspectBinding, SyntheticEffect};
pub use cache_layer::{CacheKeyStrategy, CacheReadWriteLayer, InMemoryCacheBackend, KeyStrategyRegistry, ReadOutcome};
pub use classifier::{Decision, ParallelismPolicy};
pub use executor::{CacheCodec, CacheCodecRegistry, StepExecutor};
pub use output_bus::{OutputBus, OverflowPolicy};
pub use resolver::{load_mapping, locate_mapping_file, parse_mapping, ResolvedTopology, Resolver};
pub use runner::{CanonicalOrder, PipelineRunner};

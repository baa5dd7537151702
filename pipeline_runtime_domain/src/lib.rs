// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Runtime Domain
//!
//! Pure, reusable business logic for the pipeline runtime core: the
//! reactive value and step shape abstractions steps are written against,
//! the cache policy/status vocabulary, the pipeline context tuple, aspect
//! and synthetic-identity types, the runtime mapping data model, the
//! telemetry hook surface, and the domain error type.
//!
//! Following the layering this crate is modeled on: this crate defines
//! contracts (traits, value types); `pipeline-runtime` provides the
//! concrete scheduler, cache backend, output bus, and resolver that
//! implement them against a `tokio` runtime.

pub mod aspect;
pub mod cache;
pub mod context;
pub mod error;
pub mod mapping;
pub mod reactive;
pub mod step;
pub mod telemetry;

pub use error::PipelineError;

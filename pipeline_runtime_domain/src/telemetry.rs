// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Telemetry Hooks (§4.5, §6)
//!
//! Four non-blocking hook points the Step Executor (C5) offers around every
//! step invocation. Hooks receive the step's identity, the active
//! [`PipelineContext`], and a per-item flag. Implementations are expected to
//! be cheap (counter increments, span events); anything expensive should
//! hand off to a background task.

use crate::context::PipelineContext;
use crate::step::StepId;

/// A single telemetry event, passed to every registered hook.
#[derive(Debug, Clone)]
pub struct HookEvent<'a> {
    pub step: &'a StepId,
    pub context: &'a PipelineContext,
    /// True when this event concerns one item of a larger stream, false for
    /// whole-value events (`ManyToOne`/`ManyToMany` completion).
    pub per_item: bool,
}

/// The four hook points the executor offers. A no-op implementation is the
/// default (see [`NoopTelemetry`]) so instrumentation is opt-in.
pub trait TelemetryHooks: Send + Sync {
    fn item_consumed(&self, _event: HookEvent<'_>) {}
    fn item_produced(&self, _event: HookEvent<'_>) {}
    fn step_completed_single(&self, _event: HookEvent<'_>) {}
    fn step_completed_stream(&self, _event: HookEvent<'_>) {}
}

/// Default hooks implementation: every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHooks for NoopTelemetry {}

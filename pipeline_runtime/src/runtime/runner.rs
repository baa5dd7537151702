// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Runner (C6, §4.6)
//!
//! Drives a configured list of [`StepInstance`]s over a starting
//! [`ReactiveValue`], applying the canonical step order, per-step
//! configuration, classification (C4), and dispatch (C5) in turn. The
//! runner never catches a step's error: whatever the executor returns is
//! passed straight through as the new current value, so a failure on item
//! 3 of a stream surfaces to whoever resolves the terminal value, not here.

use std::collections::HashMap;

use pipeline_runtime_domain::error::PipelineError;
use pipeline_runtime_domain::reactive::ReactiveValue;
use pipeline_runtime_domain::step::{DynItem, StepId, StepInstance};

use crate::runtime::classifier::{self, ParallelismPolicy};
use crate::runtime::executor::StepExecutor;

/// The canonical step order loaded from a generated artifact (§6: `{"order":
/// [<fully-qualified step names>]}`). An absent or empty artifact is a
/// configuration error - the runner has no order to fall back to.
#[derive(Debug, Clone)]
pub struct CanonicalOrder {
    order: Vec<String>,
}

impl CanonicalOrder {
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        #[derive(serde::Deserialize)]
        struct Doc {
            #[serde(default)]
            order: Vec<String>,
        }

        let doc: Doc = serde_json::from_str(text)?;

        if doc.order.is_empty() {
            return Err(PipelineError::configuration(
                "canonical order artifact is absent or empty",
            ));
        }

        Ok(Self { order: doc.order })
    }

    fn position(&self, step_id: &str) -> Option<usize> {
        self.order.iter().position(|s| s == step_id)
    }

    fn contains(&self, step_id: &str) -> bool {
        self.position(step_id).is_some()
    }

    /// The fully-qualified step names in canonical order, for callers that
    /// need to build step ids before a `PipelineRunner` is available (e.g. a
    /// composition root resolving placement ahead of execution).
    pub fn steps(&self) -> &[String] {
        &self.order
    }
}

/// Drives one pipeline invocation: orders the given steps, configures,
/// classifies, and dispatches each in turn.
#[derive(Clone)]
pub struct PipelineRunner {
    executor: StepExecutor,
    policy: ParallelismPolicy,
    max_concurrency: usize,
}

impl PipelineRunner {
    pub fn new(executor: StepExecutor, policy: ParallelismPolicy, max_concurrency: usize) -> Self {
        Self {
            executor,
            policy,
            max_concurrency: classifier::clamp_max_concurrency(max_concurrency as i64),
        }
    }

    /// Orders `steps` against `canonical`: if any given step is unknown to
    /// the canonical order, the given order is preserved untouched (partial
    /// knowledge isn't safe to reorder against). Otherwise steps are placed
    /// in canonical order, with any step the canonical order has no opinion
    /// on (shouldn't occur in this branch, but handled defensively) appended
    /// in its original relative position.
    fn order_steps(canonical: &CanonicalOrder, steps: &mut [StepInstance]) {
        let all_known = steps.iter().all(|s| canonical.contains(s.id().as_str()));
        if !all_known {
            return;
        }
        let original: Vec<StepId> = steps.iter().map(|s| s.id().clone()).collect();
        steps.sort_by_key(|s| {
            canonical
                .position(s.id().as_str())
                .unwrap_or_else(|| canonical.order.len() + original.iter().position(|id| id == s.id()).unwrap_or(0))
        });
    }

    /// Runs `steps` (already aspect-expanded, if applicable) over `input`
    /// under `ctx`, returning the terminal reactive value. `configs` supplies
    /// a per-step configuration block, looked up by step id; a step with no
    /// entry is never configured.
    pub async fn run(
        &self,
        canonical: &CanonicalOrder,
        mut steps: Vec<StepInstance>,
        configs: &HashMap<StepId, HashMap<String, String>>,
        ctx: pipeline_runtime_domain::context::PipelineContext,
        input: ReactiveValue<DynItem>,
    ) -> Result<ReactiveValue<DynItem>, PipelineError> {
        if !matches!(input, ReactiveValue::Single(_) | ReactiveValue::Stream(_)) {
            return Err(PipelineError::precondition("runner input must be a Single or Stream reactive value"));
        }

        Self::order_steps(canonical, &mut steps);

        let mut current = input;
        for step in &steps {
            if let Some(params) = configs.get(step.id()) {
                step.configure(params)?;
            }

            let decision = classifier::classify(step.hints(), step.shape(), self.policy, self.max_concurrency, step.id().as_str())?;

            current = self.executor.apply(step, current, ctx.clone(), decision).await?;
        }

        Ok(current)
    }
}

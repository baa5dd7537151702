// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Classifier & Parallelism Gate (C4, §4.4)
//!
//! Decides, per step, whether the executor runs it sequentially
//! (`concatenate`, preserving source order) or in parallel
//! (`merge(maxConcurrency)`, order unconstrained). The decision table is
//! reproduced verbatim from the declared hints × global policy matrix;
//! nothing here is inferred beyond what the table states.

use pipeline_runtime_domain::error::PipelineError;
use pipeline_runtime_domain::step::{Ordering, ParallelismHints, StepShape, ThreadSafety};

/// Global policy a runner invocation is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelismPolicy {
    Sequential,
    Auto,
    Parallel,
}

/// The classifier's verdict for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub parallel: bool,
    pub max_concurrency: usize,
}

impl Decision {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            max_concurrency: 1,
        }
    }

    pub fn parallel(max_concurrency: usize) -> Self {
        Self {
            parallel: true,
            max_concurrency,
        }
    }
}

/// Clamps a configured `maxConcurrency` to at least 1, warning on the
/// correction (§4.4: "values <1 are clamped to 1 with a warning").
pub fn clamp_max_concurrency(max_concurrency: i64) -> usize {
    if max_concurrency < 1 {
        tracing::warn!(
            target: "pipeline::classifier",
            configured = max_concurrency,
            "max-concurrency below 1, clamped to 1"
        );
        1
    } else {
        max_concurrency as usize
    }
}

/// Applies the decision table of §4.4.
pub fn classify(
    hints: Option<ParallelismHints>,
    shape: StepShape,
    policy: ParallelismPolicy,
    max_concurrency: usize,
    step_id: &str,
) -> Result<Decision, PipelineError> {
    if let Some(hints) = hints {
        if hints.thread_safety == ThreadSafety::Unsafe && policy != ParallelismPolicy::Sequential {
            return Err(PipelineError::precondition(format!(
                "step '{step_id}' is UNSAFE and cannot run under a non-SEQUENTIAL policy"
            )));
        }
        if hints.ordering == Ordering::StrictRequired && policy != ParallelismPolicy::Sequential {
            return Err(PipelineError::precondition(format!(
                "step '{step_id}' requires STRICT_REQUIRED ordering and cannot run under a non-SEQUENTIAL policy"
            )));
        }
    }

    if policy == ParallelismPolicy::Sequential {
        return Ok(Decision::sequential());
    }

    match hints {
        Some(hints) if hints.thread_safety == ThreadSafety::Safe => match (hints.ordering, policy) {
            (Ordering::StrictAdvised, ParallelismPolicy::Auto) => {
                tracing::warn!(target: "pipeline::classifier", step_id, "STRICT_ADVISED under AUTO: running sequentially");
                Ok(Decision::sequential())
            }
            (Ordering::StrictAdvised, ParallelismPolicy::Parallel) => {
                tracing::warn!(
                    target: "pipeline::classifier",
                    step_id,
                    "STRICT_ADVISED overridden by PARALLEL policy"
                );
                Ok(Decision::parallel(max_concurrency))
            }
            (Ordering::Relaxed, ParallelismPolicy::Auto | ParallelismPolicy::Parallel) => {
                Ok(Decision::parallel(max_concurrency))
            }
            (Ordering::StrictRequired, _) => unreachable!("handled above"),
            (_, ParallelismPolicy::Sequential) => unreachable!("handled above"),
        },
        Some(_) => unreachable!("UNSAFE handled above"),
        None => {
            if policy == ParallelismPolicy::Auto && shape.is_auto_parallel_eligible() {
                Ok(Decision::parallel(max_concurrency))
            } else {
                Ok(Decision::sequential())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(ordering: Ordering, safety: ThreadSafety) -> ParallelismHints {
        ParallelismHints::new(ordering, safety)
    }

    #[test]
    fn unsafe_under_parallel_is_a_precondition_error() {
        let result = classify(
            Some(hints(Ordering::Relaxed, ThreadSafety::Unsafe)),
            StepShape::OneToMany,
            ParallelismPolicy::Parallel,
            8,
            "s",
        );
        assert!(matches!(result, Err(PipelineError::Precondition(_))));
    }

    #[test]
    fn strict_required_under_auto_is_a_precondition_error() {
        let result = classify(
            Some(hints(Ordering::StrictRequired, ThreadSafety::Safe)),
            StepShape::OneToMany,
            ParallelismPolicy::Auto,
            8,
            "s",
        );
        assert!(matches!(result, Err(PipelineError::Precondition(_))));
    }

    #[test]
    fn unhinted_one_to_one_under_auto_stays_sequential() {
        let decision = classify(None, StepShape::OneToOne, ParallelismPolicy::Auto, 8, "s").unwrap();
        assert!(!decision.parallel);
    }

    #[test]
    fn unhinted_one_to_many_under_auto_is_parallel() {
        let decision = classify(None, StepShape::OneToMany, ParallelismPolicy::Auto, 8, "s").unwrap();
        assert!(decision.parallel);
    }

    #[test]
    fn safe_relaxed_under_parallel_is_parallel() {
        let decision = classify(
            Some(hints(Ordering::Relaxed, ThreadSafety::Safe)),
            StepShape::OneToOne,
            ParallelismPolicy::Parallel,
            4,
            "s",
        )
        .unwrap();
        assert!(decision.parallel);
        assert_eq!(decision.max_concurrency, 4);
    }

    #[test]
    fn clamp_rejects_non_positive_values() {
        assert_eq!(clamp_max_concurrency(0), 1);
        assert_eq!(clamp_max_concurrency(-5), 1);
        assert_eq!(clamp_max_concurrency(16), 16);
    }
}

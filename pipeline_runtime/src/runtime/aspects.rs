// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Aspect Expansion (C7, §4.7)
//!
//! Expands each declared [`Aspect`] into identity-preserving synthetic
//! [`StepInstance`]s inserted immediately before or after its target steps,
//! without changing any other step's functional inputs, outputs, or
//! cardinality. `Scope::Steps` is coerced to `Scope::Global` with a warning
//! (deferred per the Open Question in `DESIGN.md`): every aspect expands
//! against the full given step list.
//!
//! Disambiguation: when multiple synthetic instances share the same
//! `(AspectId, Type)` canonical id - which happens whenever a `Global`
//! aspect applies to more than one step - each instance is tagged with a
//! suffix in priority order `@before`, `@after`, `@around`, `@<index>` (I5).
//! The unsuffixed canonical id is used only when exactly one instance of a
//! given pair exists.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use pipeline_runtime_domain::aspect::{Aspect, AspectId, Position, SyntheticId, SyntheticSuffix};
use pipeline_runtime_domain::context::PipelineContext;
use pipeline_runtime_domain::error::PipelineError;
use pipeline_runtime_domain::step::{DynItem, DynStep, StepId, StepInstance, StepMeta, StepShape};

use crate::runtime::context_scope;

/// The side-effecting body a synthetic step carries. Runs against the item
/// without being able to replace or drop it - the expansion's
/// identity-preserving guarantee is enforced structurally by `SyntheticStep`
/// itself, not by convention.
#[async_trait]
pub trait SyntheticEffect: Send + Sync {
    async fn run(&self, item: &DynItem, ctx: &PipelineContext) -> Result<(), PipelineError>;
}

/// Pairs a domain [`Aspect`] declaration with the effect it materializes.
#[derive(Clone)]
pub struct AspectBinding {
    pub aspect: Aspect,
    pub effect: Arc<dyn SyntheticEffect>,
}

impl AspectBinding {
    pub fn new(aspect: Aspect, effect: Arc<dyn SyntheticEffect>) -> Self {
        Self { aspect, effect }
    }
}

struct SyntheticStep {
    id: StepId,
    effect: Arc<dyn SyntheticEffect>,
}

impl StepMeta for SyntheticStep {
    fn id(&self) -> &StepId {
        &self.id
    }
    fn shape(&self) -> StepShape {
        StepShape::OneToOne
    }
    fn cache_read_bypass(&self) -> bool {
        true
    }
}

#[async_trait]
impl DynStep for SyntheticStep {
    async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
        let ctx = context_scope::get().unwrap_or_default();
        self.effect.run(&input, &ctx).await?;
        Ok(input)
    }
}

struct Pending {
    target: StepId,
    position: Position,
    aspect_id: AspectId,
    synthetic_type: String,
    effect: Arc<dyn SyntheticEffect>,
    order: usize,
}

/// Expands `bindings` against `steps`, returning the step list with
/// synthetic steps spliced in before/after their targets.
pub fn expand(bindings: &[AspectBinding], steps: Vec<StepInstance>) -> Vec<StepInstance> {
    let mut pendings: Vec<Pending> = Vec::new();
    let mut order = 0usize;

    for binding in bindings {
        let (_, warn) = binding.aspect.scope.normalize();
        if warn {
            tracing::warn!(
                target: "pipeline::aspects",
                aspect = %binding.aspect.id,
                "STEPS scope coerced to GLOBAL"
            );
        }

        for step in &steps {
            pendings.push(Pending {
                target: step.id().clone(),
                position: binding.aspect.position,
                aspect_id: binding.aspect.id.clone(),
                synthetic_type: binding.aspect.synthetic_type.clone(),
                effect: binding.effect.clone(),
                order,
            });
            order += 1;
        }
    }

    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, p) in pendings.iter().enumerate() {
        groups.entry(format!("{}.{}", p.aspect_id, p.synthetic_type)).or_default().push(i);
    }

    let mut ids: Vec<Option<SyntheticId>> = vec![None; pendings.len()];
    for indices in groups.values() {
        if indices.len() == 1 {
            let i = indices[0];
            ids[i] = Some(SyntheticId::new(&pendings[i].aspect_id, &pendings[i].synthetic_type));
            continue;
        }

        let mut used_before = false;
        let mut used_after = false;
        for &i in indices {
            let suffix = match pendings[i].position {
                Position::BeforeStep if !used_before => {
                    used_before = true;
                    SyntheticSuffix::Before
                }
                Position::AfterStep if !used_after => {
                    used_after = true;
                    SyntheticSuffix::After
                }
                _ => SyntheticSuffix::Index(pendings[i].order),
            };
            ids[i] = Some(SyntheticId::new(&pendings[i].aspect_id, &pendings[i].synthetic_type).with_suffix(suffix));
        }
    }

    let mut before_map: HashMap<StepId, Vec<StepInstance>> = HashMap::new();
    let mut after_map: HashMap<StepId, Vec<StepInstance>> = HashMap::new();

    for (i, p) in pendings.into_iter().enumerate() {
        let id = ids[i].take().expect("every pending synthetic is assigned an id");
        let synthetic = StepInstance::new(Arc::new(SyntheticStep {
            id: StepId::new(id.qualified()),
            effect: p.effect,
        }));
        match p.position {
            Position::BeforeStep => before_map.entry(p.target).or_default().push(synthetic),
            Position::AfterStep => after_map.entry(p.target).or_default().push(synthetic),
        }
    }

    let mut result = Vec::with_capacity(steps.len());
    for step in steps {
        if let Some(befores) = before_map.remove(step.id()) {
            result.extend(befores);
        }
        let id = step.id().clone();
        result.push(step);
        if let Some(afters) = after_map.remove(&id) {
            result.extend(afters);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;
    use pipeline_runtime_domain::aspect::Scope;

    use super::*;

    struct Passthrough;
    impl StepMeta for Passthrough {
        fn id(&self) -> &StepId {
            static ID: std::sync::OnceLock<StepId> = std::sync::OnceLock::new();
            ID.get_or_init(|| StepId::new("real"))
        }
        fn shape(&self) -> StepShape {
            StepShape::OneToOne
        }
    }
    #[async_trait]
    impl DynStep for Passthrough {
        async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
            Ok(input)
        }
    }

    struct CountingEffect(Arc<AtomicUsize>);
    #[async_trait]
    impl SyntheticEffect for CountingEffect {
        async fn run(&self, _item: &DynItem, _ctx: &PipelineContext) -> Result<(), PipelineError> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn single_target_uses_unsuffixed_canonical_id() {
        let counter = Arc::new(AtomicUsize::new(0));
        let aspect = Aspect::new("metrics", "Tracing", Position::BeforeStep, Scope::Global);
        let binding = AspectBinding::new(aspect, Arc::new(CountingEffect(counter)));
        let steps = vec![StepInstance::new(Arc::new(Passthrough))];

        let expanded = expand(&[binding], steps);

        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].id().as_str(), "metrics.Tracing");
        assert_eq!(expanded[1].id().as_str(), "real");
    }

    #[test]
    fn multiple_targets_disambiguate_with_before_suffix() {
        let counter = Arc::new(AtomicUsize::new(0));
        let aspect = Aspect::new("metrics", "Tracing", Position::BeforeStep, Scope::Global);
        let binding = AspectBinding::new(aspect, Arc::new(CountingEffect(counter)));
        let steps = vec![
            StepInstance::new(Arc::new(Passthrough)),
            StepInstance::new(Arc::new(SyntheticStep {
                id: StepId::new("other"),
                effect: Arc::new(CountingEffect(Arc::new(AtomicUsize::new(0)))),
            })),
        ];

        let expanded = expand(&[binding], steps);

        // Two targets -> two synthetics sharing the same canonical id, both
        // wanting @before; the first claims it, the second falls back to
        // its zero-based expansion index.
        assert_eq!(expanded.len(), 4);
        assert_eq!(expanded[0].id().as_str(), "metrics.Tracing@before");
        assert_eq!(expanded[1].id().as_str(), "real");
        assert_eq!(expanded[2].id().as_str(), "metrics.Tracing@1");
        assert_eq!(expanded[3].id().as_str(), "other");
    }

    #[test]
    fn steps_scope_is_coerced_to_global() {
        let (scope, warned) = Scope::Steps.normalize();
        assert_eq!(scope, Scope::Global);
        assert!(warned);
    }
}

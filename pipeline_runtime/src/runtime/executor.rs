// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Executor (C5, §4.5)
//!
//! Applies a [`StepInstance`] of any of the five shapes to the runner's
//! current [`ReactiveValue`]. Every item invocation runs inside a
//! [`context_scope::scoped`] binding so cache-status observation sees the
//! right [`PipelineContext`]. Stream fan-out uses `then` (concatenate,
//! order-preserving) when the classifier says sequential, or `map` +
//! `buffer_unordered` (merge, order unconstrained) when parallel - the two
//! combinators named directly in §4.5 and §5's ordering guarantees.
//!
//! `OneToMany`/`OneToManyBlocking` fan-out is collected per input item
//! before being re-flattened into the output stream; this keeps the
//! concatenate/merge choice uniform across shapes at the cost of buffering
//! one input item's full fan-out in memory at a time (documented in
//! `DESIGN.md`).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;

use pipeline_runtime_domain::cache::{CacheEnvelope, CachePolicy};
use pipeline_runtime_domain::context::PipelineContext;
use pipeline_runtime_domain::error::PipelineError;
use pipeline_runtime_domain::reactive::{CancellationToken, ReactiveValue, SingleAsync, StreamAsync};
use pipeline_runtime_domain::step::{DynItem, StepInstance, StepShape};
use pipeline_runtime_domain::telemetry::{HookEvent, TelemetryHooks};

use crate::infrastructure::metrics::RuntimeMetrics;
use crate::runtime::cache_layer::{CacheReadWriteLayer, ReadOutcome};
use crate::runtime::classifier::Decision;
use crate::runtime::context_scope;

/// Bridges a type-erased [`DynItem`] to and from the cache layer's
/// `CacheEnvelope`, keyed by the fully-qualified type name a step declares
/// via `CacheKeyTarget` (§4.3: "deserialization selects a registered parser
/// by `type`").
pub trait CacheCodec: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn encode(&self, item: &DynItem) -> Result<CacheEnvelope, PipelineError>;
    fn decode(&self, envelope: &CacheEnvelope) -> Result<DynItem, PipelineError>;
}

#[derive(Clone, Default)]
pub struct CacheCodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn CacheCodec>>,
}

impl CacheCodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, codec: Arc<dyn CacheCodec>) {
        self.codecs.insert(codec.type_name(), codec);
    }

    fn get(&self, type_name: &str) -> Option<&Arc<dyn CacheCodec>> {
        self.codecs.get(type_name)
    }
}

fn hook(step: &StepInstance, ctx: &PipelineContext, per_item: bool) -> HookEvent<'_> {
    HookEvent {
        step: step.id(),
        context: ctx,
        per_item,
    }
}

/// Applies each of the five step shapes, threading cache read/write,
/// context binding, and telemetry hooks through the invocation. Cheaply
/// `Clone` (every field is `Arc`-backed or `Copy`) so it can be moved into
/// stream-combinator closures.
#[derive(Clone)]
pub struct StepExecutor {
    cache: Arc<CacheReadWriteLayer>,
    codecs: CacheCodecRegistry,
    telemetry: Arc<dyn TelemetryHooks>,
    metrics: Option<Arc<RuntimeMetrics>>,
    cache_default: CachePolicy,
}

impl StepExecutor {
    pub fn new(cache: Arc<CacheReadWriteLayer>, codecs: CacheCodecRegistry, telemetry: Arc<dyn TelemetryHooks>) -> Self {
        Self {
            cache,
            codecs,
            telemetry,
            metrics: None,
            cache_default: CachePolicy::CacheOnly,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cache_default(mut self, policy: CachePolicy) -> Self {
        self.cache_default = policy;
        self
    }

    /// Dispatches `step` against `input`, per the per-shape behavior of
    /// §4.5.
    pub async fn apply(
        &self,
        step: &StepInstance,
        input: ReactiveValue<DynItem>,
        ctx: PipelineContext,
        decision: Decision,
    ) -> Result<ReactiveValue<DynItem>, PipelineError> {
        if let Some(metrics) = &self.metrics {
            metrics.record_step_invoked(step.id().as_str(), &format!("{:?}", step.shape()));
        }

        match step.shape() {
            StepShape::OneToOne => self.apply_one_to_one(step, input, ctx, decision, true).await,
            StepShape::OneToOneFuture => self.apply_one_to_one(step, input, ctx, decision, false).await,
            StepShape::OneToMany => self.apply_one_to_many(step, input, ctx, decision, false).await,
            StepShape::OneToManyBlocking => self.apply_one_to_many(step, input, ctx, decision, true).await,
            StepShape::ManyToOne => self.apply_many_to_one(step, input, ctx).await,
            StepShape::ManyToMany => self.apply_many_to_many(step, input, ctx).await,
        }
    }

    // -- OneToOne / OneToOneFuture ------------------------------------------------

    async fn apply_one_to_one(
        &self,
        step: &StepInstance,
        input: ReactiveValue<DynItem>,
        ctx: PipelineContext,
        decision: Decision,
        cache_eligible: bool,
    ) -> Result<ReactiveValue<DynItem>, PipelineError> {
        match input {
            ReactiveValue::Single(single) => {
                let cancel = single.cancellation().clone();
                let item = single.resolve().await?;
                let result = self.invoke_one_to_one(step, item, &ctx, cache_eligible).await;
                self.telemetry.step_completed_single(hook(step, &ctx, false));
                Ok(ReactiveValue::Single(SingleAsync::ready(cancel, result)))
            }
            ReactiveValue::Stream(stream) => {
                let (inner, cancel) = stream.into_inner();
                let executor = self.clone();
                let step_for_map = step.clone();
                let map_ctx = ctx.clone();

                let out: futures::stream::BoxStream<'static, Result<DynItem, PipelineError>> = if decision.parallel {
                    inner
                        .map(move |item| {
                            let executor = executor.clone();
                            let step = step_for_map.clone();
                            let ctx = map_ctx.clone();
                            async move {
                                let item = item?;
                                executor.invoke_one_to_one(&step, item, &ctx, cache_eligible).await
                            }
                        })
                        .buffer_unordered(decision.max_concurrency)
                        .boxed()
                } else {
                    inner
                        .then(move |item| {
                            let executor = executor.clone();
                            let step = step_for_map.clone();
                            let ctx = map_ctx.clone();
                            async move {
                                let item = item?;
                                executor.invoke_one_to_one(&step, item, &ctx, cache_eligible).await
                            }
                        })
                        .boxed()
                };

                self.telemetry.step_completed_stream(hook(step, &ctx, true));
                Ok(ReactiveValue::Stream(StreamAsync::new(cancel, out)))
            }
        }
    }

    async fn invoke_one_to_one(
        &self,
        step: &StepInstance,
        item: DynItem,
        ctx: &PipelineContext,
        cache_eligible: bool,
    ) -> Result<DynItem, PipelineError> {
        context_scope::scoped(ctx.clone(), async {
            self.telemetry.item_consumed(hook(step, ctx, true));

            let result = if !cache_eligible {
                // OneToOneFuture bypasses cache-read integration entirely
                // (§9 Open Question - reproduced intentionally, see
                // DESIGN.md).
                step.inner.call_one_to_one_future(item).await
            } else if step.cache_read_bypass() {
                step.inner.call_one_to_one(item).await
            } else {
                self.invoke_cached_one_to_one(step, item, ctx).await
            }?;

            self.telemetry.item_produced(hook(step, ctx, true));
            Ok(result)
        })
        .await
    }

    async fn invoke_cached_one_to_one(
        &self,
        step: &StepInstance,
        item: DynItem,
        ctx: &PipelineContext,
    ) -> Result<DynItem, PipelineError> {
        let target = step.cache_key_target();
        let outcome = self
            .cache
            .read_through(item.as_ref() as &(dyn Any + Send + Sync), ctx, target, self.cache_default)
            .await?;

        if let ReadOutcome::Hit(envelope) = &outcome {
            match self.decode(envelope) {
                Some(decoded) => return Ok(decoded),
                // Unknown payload type: §4.3 "unknown types log and return
                // a miss" - fall through and re-invoke the step.
                None => tracing::warn!(
                    target: "pipeline::cache",
                    type_name = %envelope.type_name,
                    "no codec registered for cached payload type, treating as miss"
                ),
            }
        }

        let result = step.inner.call_one_to_one(item.clone()).await?;

        if !matches!(outcome, ReadOutcome::Bypass) {
            if let Some(target) = target {
                if let Some(codec) = self.codecs.get(target) {
                    if let Ok(envelope) = codec.encode(&result) {
                        self.cache
                            .write_through(item.as_ref() as &(dyn Any + Send + Sync), ctx, Some(target), self.cache_default, envelope)
                            .await;
                    }
                }
            }
        }

        Ok(result)
    }

    fn decode(&self, envelope: &CacheEnvelope) -> Option<DynItem> {
        self.codecs.get(&envelope.type_name).and_then(|codec| codec.decode(envelope).ok())
    }

    // -- OneToMany / OneToManyBlocking --------------------------------------------

    async fn apply_one_to_many(
        &self,
        step: &StepInstance,
        input: ReactiveValue<DynItem>,
        ctx: PipelineContext,
        decision: Decision,
        blocking: bool,
    ) -> Result<ReactiveValue<DynItem>, PipelineError> {
        let cancel = input.cancellation().clone();
        let source = input.into_stream().into_inner().0;

        let executor = self.clone();
        let step_for_map = step.clone();
        let map_ctx = ctx.clone();

        let fanned: futures::stream::BoxStream<'static, Result<Vec<DynItem>, PipelineError>> = if decision.parallel {
            source
                .map(move |item| {
                    let executor = executor.clone();
                    let step = step_for_map.clone();
                    let ctx = map_ctx.clone();
                    async move {
                        let item = item?;
                        executor.produce_many(&step, item, &ctx, blocking).await
                    }
                })
                .buffer_unordered(decision.max_concurrency)
                .boxed()
        } else {
            source
                .then(move |item| {
                    let executor = executor.clone();
                    let step = step_for_map.clone();
                    let ctx = map_ctx.clone();
                    async move {
                        let item = item?;
                        executor.produce_many(&step, item, &ctx, blocking).await
                    }
                })
                .boxed()
        };

        let flattened = fanned.flat_map(|batch| match batch {
            Ok(items) => futures::stream::iter(items.into_iter().map(Ok)).boxed(),
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        });

        self.telemetry.step_completed_stream(hook(step, &ctx, true));
        Ok(ReactiveValue::Stream(StreamAsync::new(cancel, flattened)))
    }

    async fn produce_many(
        &self,
        step: &StepInstance,
        item: DynItem,
        ctx: &PipelineContext,
        blocking: bool,
    ) -> Result<Vec<DynItem>, PipelineError> {
        context_scope::scoped(ctx.clone(), async {
            self.telemetry.item_consumed(hook(step, ctx, true));

            let items = if blocking {
                let step = step.clone();
                let step_id = step.id().to_string();
                tokio::task::spawn_blocking(move || step.inner.call_one_to_many_blocking(item))
                    .await
                    .map_err(|e| PipelineError::step_failure(step_id, e))??
            } else {
                let cancel = CancellationToken::new();
                step.inner.call_one_to_many(item, cancel).await.collect_vec().await?
            };

            for _ in &items {
                self.telemetry.item_produced(hook(step, ctx, true));
            }
            Ok(items)
        })
        .await
    }

    // -- ManyToOne / ManyToMany ----------------------------------------------------

    async fn apply_many_to_one(
        &self,
        step: &StepInstance,
        input: ReactiveValue<DynItem>,
        ctx: PipelineContext,
    ) -> Result<ReactiveValue<DynItem>, PipelineError> {
        let stream = input.into_stream();
        let cancel = stream.cancellation().clone();

        let result = context_scope::scoped(ctx.clone(), async {
            self.telemetry.item_consumed(hook(step, &ctx, false));
            let result = step.inner.call_many_to_one(stream).await;
            if result.is_ok() {
                self.telemetry.item_produced(hook(step, &ctx, false));
            }
            result
        })
        .await;

        self.telemetry.step_completed_single(hook(step, &ctx, false));
        Ok(ReactiveValue::Single(SingleAsync::ready(cancel, result)))
    }

    async fn apply_many_to_many(
        &self,
        step: &StepInstance,
        input: ReactiveValue<DynItem>,
        ctx: PipelineContext,
    ) -> Result<ReactiveValue<DynItem>, PipelineError> {
        let stream = input.into_stream();
        let cancel = stream.cancellation().clone();
        let out = step.inner.call_many_to_many(stream).await;
        self.telemetry.step_completed_stream(hook(step, &ctx, true));
        let (inner, _) = out.into_inner();
        Ok(ReactiveValue::Stream(StreamAsync::new(cancel, inner)))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pipeline_runtime_domain::step::{DynStep, StepId, StepMeta};

    use super::*;
    use crate::runtime::cache_layer::{CacheReadWriteLayer, InMemoryCacheBackend, KeyStrategyRegistry};
    use crate::runtime::classifier::Decision;

    struct Double;
    impl StepMeta for Double {
        fn id(&self) -> &StepId {
            static ID: std::sync::OnceLock<StepId> = std::sync::OnceLock::new();
            ID.get_or_init(|| StepId::new("double"))
        }
        fn shape(&self) -> StepShape {
            StepShape::OneToOne
        }
    }

    #[async_trait]
    impl DynStep for Double {
        async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
            let n = *input.downcast_ref::<i32>().unwrap();
            Ok(Arc::new(n * 2))
        }
    }

    fn executor() -> StepExecutor {
        let cache = Arc::new(CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), KeyStrategyRegistry::new()));
        StepExecutor::new(cache, CacheCodecRegistry::new(), Arc::new(pipeline_runtime_domain::telemetry::NoopTelemetry))
    }

    #[tokio::test]
    async fn one_to_one_over_a_single_value() {
        let step = StepInstance::new(Arc::new(Double));
        let executor = executor();
        let cancel = CancellationToken::new();
        let input = ReactiveValue::Single(SingleAsync::ready(cancel, Ok(Arc::new(21i32) as DynItem)));

        let output = executor
            .apply(&step, input, PipelineContext::new(), Decision::sequential())
            .await
            .unwrap();

        let ReactiveValue::Single(single) = output else { panic!("expected single") };
        let result = single.resolve().await.unwrap();
        assert_eq!(*result.downcast_ref::<i32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn one_to_one_concatenate_preserves_order() {
        let step = StepInstance::new(Arc::new(Double));
        let executor = executor();
        let cancel = CancellationToken::new();
        let items: Vec<DynItem> = vec![Arc::new(1i32), Arc::new(2i32), Arc::new(3i32)];
        let input = ReactiveValue::Stream(StreamAsync::from_vec(cancel, items));

        let output = executor
            .apply(&step, input, PipelineContext::new(), Decision::sequential())
            .await
            .unwrap();

        let ReactiveValue::Stream(stream) = output else { panic!("expected stream") };
        let values: Vec<i32> = stream
            .collect_vec()
            .await
            .unwrap()
            .into_iter()
            .map(|v| *v.downcast_ref::<i32>().unwrap())
            .collect();
        assert_eq!(values, vec![2, 4, 6]);
    }
}

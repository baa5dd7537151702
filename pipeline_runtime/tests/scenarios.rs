// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end scenario tests driving the runner, executor, cache layer, and
//! resolver together the way an embedding application would.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;

use pipeline_runtime_domain::cache::{CacheBackend, CacheEnvelope, CachePolicy};
use pipeline_runtime_domain::context::PipelineContext;
use pipeline_runtime_domain::error::{PipelineError, ResolverErrorCode};
use pipeline_runtime_domain::reactive::{CancellationToken, ReactiveValue, SingleAsync, StreamAsync};
use pipeline_runtime_domain::step::{DynItem, DynStep, Ordering, ParallelismHints, StepId, StepInstance, StepMeta, StepShape, ThreadSafety};
use pipeline_runtime_domain::telemetry::NoopTelemetry;

use pipeline_runtime::runtime::cache_layer::{CacheKeyStrategy, CacheReadWriteLayer, InMemoryCacheBackend, KeyStrategyRegistry};
use pipeline_runtime::runtime::classifier::{Decision, ParallelismPolicy};
use pipeline_runtime::runtime::executor::{CacheCodec, CacheCodecRegistry, StepExecutor};
use pipeline_runtime::runtime::resolver::{load_mapping, Resolver};
use pipeline_runtime::runtime::runner::{CanonicalOrder, PipelineRunner};

struct Double(StepId);
impl StepMeta for Double {
    fn id(&self) -> &StepId {
        &self.0
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

struct Incr(StepId);
impl StepMeta for Incr {
    fn id(&self) -> &StepId {
        &self.0
    }
    fn shape(&self) -> StepShape {
        StepShape::OneToOne
    }
}
#[async_trait]
impl DynStep for Incr {
    async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
        let n = *input.downcast_ref::<i32>().unwrap();
        Ok(Arc::new(n + 1))
    }
}

#[tokio::test]
async fn s1_sequential_chain_applies_steps_in_canonical_order() {
    let canonical = CanonicalOrder::from_json(r#"{"order": ["double", "incr"]}"#).unwrap();
    let steps = vec![
        StepInstance::new(Arc::new(Double(StepId::new("double")))),
        StepInstance::new(Arc::new(Incr(StepId::new("incr")))),
    ];

    let cache = Arc::new(CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), KeyStrategyRegistry::new()));
    let executor = StepExecutor::new(cache, CacheCodecRegistry::new(), Arc::new(NoopTelemetry)).with_cache_default(CachePolicy::CacheOnly);
    let runner = PipelineRunner::new(executor, ParallelismPolicy::Sequential, 4);

    let cancel = CancellationToken::new();
    let items: Vec<DynItem> = vec![Arc::new(1i32), Arc::new(2i32), Arc::new(3i32)];
    let input = ReactiveValue::Stream(StreamAsync::from_vec(cancel, items));

    let output = runner
        .run(&canonical, steps, &std::collections::HashMap::new(), PipelineContext::new(), input)
        .await
        .unwrap();

    let ReactiveValue::Stream(stream) = output else { panic!("expected a stream") };
    let values: Vec<i32> = stream
        .collect_vec()
        .await
        .unwrap()
        .into_iter()
        .map(|v| *v.downcast_ref::<i32>().unwrap())
        .collect();
    assert_eq!(values, vec![3, 5, 7]);
}

struct Split(StepId);
impl StepMeta for Split {
    fn id(&self) -> &StepId {
        &self.0
    }
    fn shape(&self) -> StepShape {
        StepShape::OneToMany
    }
    fn hints(&self) -> Option<ParallelismHints> {
        Some(ParallelismHints::new(Ordering::Relaxed, ThreadSafety::Safe))
    }
}
#[async_trait]
impl DynStep for Split {
    async fn call_one_to_many(&self, input: DynItem, cancel: CancellationToken) -> StreamAsync<DynItem> {
        let n = *input.downcast_ref::<i32>().unwrap();
        let items: Vec<DynItem> = vec![Arc::new(n), Arc::new(-n)];
        StreamAsync::from_vec(cancel, items)
    }
}

#[tokio::test]
async fn s2_parallel_fan_out_yields_every_item_order_unconstrained() {
    let canonical = CanonicalOrder::from_json(r#"{"order": ["split"]}"#).unwrap();
    let steps = vec![StepInstance::new(Arc::new(Split(StepId::new("split"))))];

    let cache = Arc::new(CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), KeyStrategyRegistry::new()));
    let executor = StepExecutor::new(cache, CacheCodecRegistry::new(), Arc::new(NoopTelemetry)).with_cache_default(CachePolicy::CacheOnly);
    let runner = PipelineRunner::new(executor, ParallelismPolicy::Parallel, 2);

    let cancel = CancellationToken::new();
    let items: Vec<DynItem> = vec![Arc::new(1i32), Arc::new(2i32), Arc::new(3i32)];
    let input = ReactiveValue::Stream(StreamAsync::from_vec(cancel, items));

    let output = runner
        .run(&canonical, steps, &std::collections::HashMap::new(), PipelineContext::new(), input)
        .await
        .unwrap();

    let ReactiveValue::Stream(stream) = output else { panic!("expected a stream") };
    let values: HashSet<i32> = stream
        .collect_vec()
        .await
        .unwrap()
        .into_iter()
        .map(|v| *v.downcast_ref::<i32>().unwrap())
        .collect();
    assert_eq!(values, HashSet::from([1, -1, 2, -2, 3, -3]));
}

struct DecimalKeyStrategy;
impl CacheKeyStrategy for DecimalKeyStrategy {
    fn name(&self) -> &'static str {
        "decimal"
    }
    fn priority(&self) -> i32 {
        0
    }
    fn derive_key(&self, item: &(dyn Any + Send + Sync)) -> Option<String> {
        item.downcast_ref::<i32>().map(|n| n.to_string())
    }
}

struct I32Codec;
impl CacheCodec for I32Codec {
    fn type_name(&self) -> &'static str {
        "i32"
    }
    fn encode(&self, item: &DynItem) -> Result<CacheEnvelope, PipelineError> {
        let n = *item.downcast_ref::<i32>().unwrap();
        Ok(CacheEnvelope::json("i32", n.to_string()))
    }
    fn decode(&self, envelope: &CacheEnvelope) -> Result<DynItem, PipelineError> {
        let n: i32 = envelope
            .payload
            .parse()
            .map_err(|_| PipelineError::SerializationError("not an i32".to_string()))?;
        Ok(Arc::new(n))
    }
}

struct CountingAddOne(StepId, Arc<AtomicUsize>);
impl StepMeta for CountingAddOne {
    fn id(&self) -> &StepId {
        &self.0
    }
    fn shape(&self) -> StepShape {
        StepShape::OneToOne
    }
}
#[async_trait]
impl DynStep for CountingAddOne {
    async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
        self.1.fetch_add(1, AtomicOrdering::SeqCst);
        let n = *input.downcast_ref::<i32>().unwrap();
        Ok(Arc::new(n + 1))
    }
}

fn decimal_cache() -> (Arc<InMemoryCacheBackend>, Arc<CacheReadWriteLayer>) {
    let backend = Arc::new(InMemoryCacheBackend::new());
    let mut registry = KeyStrategyRegistry::new();
    registry.register(Arc::new(DecimalKeyStrategy));
    let cache = Arc::new(CacheReadWriteLayer::new(backend.clone(), registry));
    (backend, cache)
}

#[tokio::test]
async fn s3_cache_hit_returns_cached_value_without_invoking_the_step() {
    let (backend, cache) = decimal_cache();
    let key = cache.resolve_key(&1i32, &PipelineContext::new(), None).unwrap();
    backend.cache(&key, CacheEnvelope::json("i32", "42"), None).await.unwrap();

    let mut codecs = CacheCodecRegistry::new();
    codecs.register(Arc::new(I32Codec));
    let executor = StepExecutor::new(cache, codecs, Arc::new(NoopTelemetry)).with_cache_default(CachePolicy::CacheOnly);

    let counter = Arc::new(AtomicUsize::new(0));
    let step = StepInstance::new(Arc::new(CountingAddOne(StepId::new("f"), counter.clone())));
    let ctx = PipelineContext::new().with_cache_policy(CachePolicy::ReturnCached);
    let cancel = CancellationToken::new();
    let input = ReactiveValue::Single(SingleAsync::ready(cancel, Ok(Arc::new(1i32) as DynItem)));

    let output = executor.apply(&step, input, ctx, Decision::sequential()).await.unwrap();
    let ReactiveValue::Single(single) = output else { panic!("expected a single value") };
    let result = single.resolve().await.unwrap();

    assert_eq!(*result.downcast_ref::<i32>().unwrap(), 42);
    assert_eq!(counter.load(AtomicOrdering::SeqCst), 0, "step body must not run on a cache hit");
}

#[tokio::test]
async fn s4_require_cache_without_an_entry_is_a_policy_violation_and_writes_nothing() {
    let (backend, cache) = decimal_cache();
    let key = cache.resolve_key(&1i32, &PipelineContext::new(), None).unwrap();

    let mut codecs = CacheCodecRegistry::new();
    codecs.register(Arc::new(I32Codec));
    let executor = StepExecutor::new(cache, codecs, Arc::new(NoopTelemetry)).with_cache_default(CachePolicy::CacheOnly);

    let counter = Arc::new(AtomicUsize::new(0));
    let step = StepInstance::new(Arc::new(CountingAddOne(StepId::new("f"), counter.clone())));
    let ctx = PipelineContext::new().with_cache_policy(CachePolicy::RequireCache);
    let cancel = CancellationToken::new();
    let input = ReactiveValue::Single(SingleAsync::ready(cancel, Ok(Arc::new(1i32) as DynItem)));

    let result = executor.apply(&step, input, ctx, Decision::sequential()).await;

    assert!(matches!(result, Err(PipelineError::CachePolicyViolation(_))));
    assert_eq!(counter.load(AtomicOrdering::SeqCst), 0, "REQUIRE_CACHE must fail before invoking the step");
    assert!(!backend.exists(&key).await.unwrap(), "a rejected REQUIRE_CACHE invocation must not write back");
}

#[test]
fn s5_monolith_mapping_rejects_a_step_placed_in_an_undeclared_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.runtime.yaml");
    std::fs::write(
        &path,
        r#"
        version: 1
        layout: monolith
        validation: auto
        runtimes:
          default: {}
        modules:
          monolith: { runtime: default }
        steps:
          X: { module: A }
        "#,
    )
    .unwrap();

    let mapping = load_mapping(Some(path.as_path())).unwrap();
    let resolver = Resolver::new(mapping);
    let result = resolver.resolve(&[StepId::new("X")], &[]);

    match result {
        Err(PipelineError::ResolverValidation { code, message }) => {
            assert_eq!(code, ResolverErrorCode::UnknownModule);
            assert!(message.contains('A'), "error message should name the offending module: {message}");
        }
        other => panic!("expected RUNTIME_MAP_UNKNOWN_MODULE, got {other:?}"),
    }
}

#[tokio::test]
async fn s6_absent_order_artifact_is_a_configuration_error_and_no_step_runs() {
    let counter = Arc::new(AtomicUsize::new(0));
    let step = StepInstance::new(Arc::new(CountingAddOne(StepId::new("f"), counter.clone())));

    let canonical = CanonicalOrder::from_json("{}");
    assert!(matches!(canonical, Err(PipelineError::Configuration(_))));

    // With no canonical order, nothing ever calls PipelineRunner::run, so
    // the step's own body is never reached.
    assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);
    drop(step);
}

// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Property tests for the laws a correct implementation must hold
//! regardless of input: cache-hit determinism (P2), version-tag key
//! prefixing (P6), and synthetic-id disambiguation (P9).

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use pipeline_runtime_domain::aspect::{AspectId, SyntheticId};
use pipeline_runtime_domain::cache::{CacheBackend, CacheEnvelope, CacheKey, CachePolicy};
use pipeline_runtime_domain::context::PipelineContext;
use pipeline_runtime_domain::error::{PipelineError, ResolverErrorCode};
use pipeline_runtime_domain::mapping::RuntimeMapping;
use pipeline_runtime_domain::reactive::{CancellationToken, ReactiveValue, SingleAsync};
use pipeline_runtime_domain::step::{DynItem, DynStep, StepId, StepInstance, StepMeta, StepShape};
use pipeline_runtime_domain::telemetry::NoopTelemetry;

use pipeline_runtime::runtime::cache_layer::{CacheKeyStrategy, CacheReadWriteLayer, InMemoryCacheBackend, KeyStrategyRegistry};
use pipeline_runtime::runtime::classifier::Decision;
use pipeline_runtime::runtime::executor::{CacheCodec, CacheCodecRegistry, StepExecutor};
use pipeline_runtime::runtime::resolver::Resolver;

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

struct CountingStep(StepId, Arc<AtomicUsize>);
impl StepMeta for CountingStep {
    fn id(&self) -> &StepId {
        &self.0
    }
    fn shape(&self) -> StepShape {
        StepShape::OneToOne
    }
}
#[async_trait]
impl DynStep for CountingStep {
    async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
        self.1.fetch_add(1, AtomicOrdering::SeqCst);
        let n = *input.downcast_ref::<i32>().unwrap();
        Ok(Arc::new(n + 1))
    }
}

proptest! {
    /// P2: a `RETURN_CACHED` step with a populated cache entry always
    /// returns the cached value and never invokes its own body, regardless
    /// of the input or cached output chosen.
    #[test]
    fn p2_cache_hit_short_circuits_the_step_for_any_input(input in any::<i32>(), cached in any::<i32>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let backend = Arc::new(InMemoryCacheBackend::new());
            let mut registry = KeyStrategyRegistry::new();
            registry.register(Arc::new(DecimalKeyStrategy));
            let cache = Arc::new(CacheReadWriteLayer::new(backend.clone(), registry));

            let ctx = PipelineContext::new().with_cache_policy(CachePolicy::ReturnCached);
            let key = cache.resolve_key(&input, &ctx, None).unwrap();
            backend.cache(&key, CacheEnvelope::json("i32", cached.to_string()), None).await.unwrap();

            let mut codecs = CacheCodecRegistry::new();
            codecs.register(Arc::new(I32Codec));
            let executor = StepExecutor::new(cache, codecs, Arc::new(NoopTelemetry)).with_cache_default(CachePolicy::CacheOnly);

            let counter = Arc::new(AtomicUsize::new(0));
            let step = StepInstance::new(Arc::new(CountingStep(StepId::new("f"), counter.clone())));
            let cancel = CancellationToken::new();
            let value = ReactiveValue::Single(SingleAsync::ready(cancel, Ok(Arc::new(input) as DynItem)));

            let output = executor.apply(&step, value, ctx, Decision::sequential()).await.unwrap();
            let ReactiveValue::Single(single) = output else { panic!("expected a single value") };
            let result = single.resolve().await.unwrap();

            prop_assert_eq!(*result.downcast_ref::<i32>().unwrap(), cached);
            prop_assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);
            Ok(())
        });
        result?;
    }

    /// P6: `CacheKey::resolve` prefixes with `"<tag>:"` exactly when the
    /// version tag is non-blank, and leaves the base key untouched
    /// otherwise, for any base key / tag combination.
    #[test]
    fn p6_version_tag_prefixes_the_key_iff_non_blank(
        base in "[a-zA-Z0-9_-]{1,12}",
        tag in proptest::option::of("[a-zA-Z0-9_-]{0,8}"),
    ) {
        let resolved = CacheKey::resolve(&base, tag.as_deref());
        let expected = match tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => format!("{t}:{}", base.trim()),
            None => base.trim().to_string(),
        };
        prop_assert_eq!(resolved.unwrap().as_str(), expected.as_str());
    }

    /// P9: among N synthetic instances sharing the same canonical
    /// `(AspectId, Type)` and no disambiguating suffix, resolution succeeds
    /// iff N == 1, and fails with `SyntheticAmbiguous` otherwise.
    #[test]
    fn p9_synthetic_ambiguity_tracks_instance_count(count in 1usize..6) {
        let resolver = Resolver::new(RuntimeMapping::default());
        let aspect_id = AspectId::new("metrics");
        let ids: Vec<SyntheticId> = (0..count).map(|_| SyntheticId::new(&aspect_id, "Tracing")).collect();

        let result = resolver.resolve(&[], &ids);

        if count == 1 {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(matches!(
                result,
                Err(PipelineError::ResolverValidation { code: ResolverErrorCode::SyntheticAmbiguous, .. })
            ));
        }
    }
}

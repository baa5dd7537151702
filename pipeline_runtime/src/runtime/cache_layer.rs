// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cache Read/Write Layer (C3, §4.3)
//!
//! Key derivation, policy enforcement, and the read-through/write-through
//! algorithm that sits between the executor and a [`CacheBackend`]. A
//! `CacheKeyStrategy` registry picks a base key for an item; the layer
//! prefixes it with the active version tag, enforces the effective
//! `CachePolicy`, and reports `CacheStatus` to the active context scope.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use pipeline_runtime_domain::cache::{CacheBackend, CacheEnvelope, CacheKey, CachePolicy, CacheStatus};
use pipeline_runtime_domain::context::PipelineContext;
use pipeline_runtime_domain::error::PipelineError;

use crate::infrastructure::metrics::RuntimeMetrics;
use crate::runtime::context_scope;

/// Derives a base cache key for an item of a declared target type. Multiple
/// strategies are tried in descending priority; a strategy that declares a
/// `target()` is tried first against steps that declared the matching
/// `CacheKeyTarget` (§4.3).
pub trait CacheKeyStrategy: Send + Sync {
    /// Stable name a configuration's `pipeline.cache.key-generator` can
    /// select by, e.g. `"decimal"`.
    fn name(&self) -> &'static str;

    /// Priority order; higher runs first among strategies with no matching
    /// target, or first among target-matching strategies.
    fn priority(&self) -> i32;

    /// The `CacheKeyTarget` this strategy prefers to serve, if any.
    fn target(&self) -> Option<&'static str> {
        None
    }

    /// Derives a base key for `item`, or `None` if this strategy has nothing
    /// to say about it.
    fn derive_key(&self, item: &(dyn Any + Send + Sync)) -> Option<String>;
}

/// Priority-ordered registry of key strategies.
#[derive(Clone, Default)]
pub struct KeyStrategyRegistry {
    strategies: Vec<Arc<dyn CacheKeyStrategy>>,
}

impl KeyStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn CacheKeyStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// Resolves a base key for `item`. When `preferred` names a registered
    /// strategy (`pipeline.cache.key-generator`), that strategy is tried
    /// first; otherwise - or if it yields nothing - strategies that declare
    /// `target` are tried, then the remainder in full priority order (§4.3).
    pub fn resolve_base_key(&self, item: &(dyn Any + Send + Sync), target: Option<&str>, preferred: Option<&str>) -> Option<String> {
        if let Some(name) = preferred {
            if let Some(strategy) = self.strategies.iter().find(|s| s.name() == name) {
                if let Some(key) = non_blank(strategy.derive_key(item)) {
                    return Some(key);
                }
            }
        }
        if let Some(target) = target {
            for strategy in self.strategies.iter().filter(|s| s.target() == Some(target)) {
                if let Some(key) = non_blank(strategy.derive_key(item)) {
                    return Some(key);
                }
            }
        }
        for strategy in &self.strategies {
            if let Some(key) = non_blank(strategy.derive_key(item)) {
                return Some(key);
            }
        }
        None
    }
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.and_then(|k| {
        let trimmed = k.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// In-process `CacheBackend` implementation, useful standalone and as the
/// default when no external backend is configured. Safe under concurrent
/// access: all state lives behind a single `parking_lot::RwLock`, matching
/// the protected-state pattern the executor's own concurrent-access
/// contract requires (§5 Shared resources (b)).
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<std::collections::HashMap<String, CacheEnvelope>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEnvelope>, PipelineError> {
        Ok(self.entries.read().get(key.as_str()).cloned())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool, PipelineError> {
        Ok(self.entries.read().contains_key(key.as_str()))
    }

    async fn cache(
        &self,
        key: &CacheKey,
        value: CacheEnvelope,
        _ttl: Option<std::time::Duration>,
    ) -> Result<CacheEnvelope, PipelineError> {
        self.entries.write().insert(key.as_str().to_string(), value.clone());
        Ok(value)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<bool, PipelineError> {
        Ok(self.entries.write().remove(key.as_str()).is_some())
    }

    async fn invalidate_by_prefix(&self, prefix: &str) -> Result<u64, PipelineError> {
        let mut guard = self.entries.write();
        let before = guard.len();
        guard.retain(|k, _| !k.starts_with(prefix));
        Ok((before - guard.len()) as u64)
    }
}

/// Outcome of the read-through contract for one item (§4.3 steps 1-4).
pub enum ReadOutcome {
    /// Use this cached envelope instead of invoking the step.
    Hit(CacheEnvelope),
    /// No usable cache entry; invoke the step and (depending on policy)
    /// write its result back via [`CacheReadWriteLayer::write_through`].
    Miss,
    /// `BYPASS_CACHE`: invoke the step, never touch the cache.
    Bypass,
}

/// The cache layer the executor consults around every non-bypassing
/// `OneToOne` invocation.
pub struct CacheReadWriteLayer {
    backend: Arc<dyn CacheBackend>,
    strategies: KeyStrategyRegistry,
    metrics: Option<Arc<RuntimeMetrics>>,
    key_generator: Option<String>,
}

impl CacheReadWriteLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, strategies: KeyStrategyRegistry) -> Self {
        Self {
            backend,
            strategies,
            metrics: None,
            key_generator: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Configures which registered [`CacheKeyStrategy`] `pipeline.cache.key-generator`
    /// names should be preferred during key resolution (§4.9.3).
    pub fn with_key_generator(mut self, name: impl Into<String>) -> Self {
        self.key_generator = Some(name.into());
        self
    }

    /// Resolves the effective cache key for `item` under `ctx`, honoring a
    /// context override before falling back to strategy derivation (§4.3).
    pub fn resolve_key(
        &self,
        item: &(dyn Any + Send + Sync),
        ctx: &PipelineContext,
        target: Option<&str>,
    ) -> Option<CacheKey> {
        let base = ctx
            .cache_key_override
            .clone()
            .or_else(|| self.strategies.resolve_base_key(item, target, self.key_generator.as_deref()));
        let base = base?;
        CacheKey::resolve(&base, ctx.version_tag.as_deref())
    }

    /// Executes the read-through contract (§4.3 steps 1-4) for one item.
    pub async fn read_through(
        &self,
        item: &(dyn Any + Send + Sync),
        ctx: &PipelineContext,
        target: Option<&str>,
        configured_default: CachePolicy,
    ) -> Result<ReadOutcome, PipelineError> {
        let policy = ctx.effective_policy(configured_default);

        if policy == CachePolicy::BypassCache {
            context_scope::record_cache_status(CacheStatus::Bypass);
            return Ok(ReadOutcome::Bypass);
        }
        if !policy.attempts_read() {
            context_scope::record_cache_status(CacheStatus::None);
            return Ok(ReadOutcome::Miss);
        }

        let key = self.resolve_key(item, ctx, target);
        let Some(key) = key else {
            if policy == CachePolicy::RequireCache {
                return Err(PipelineError::cache_policy_violation(
                    "REQUIRE_CACHE: no cache key could be resolved",
                ));
            }
            context_scope::record_cache_status(CacheStatus::None);
            return Ok(ReadOutcome::Miss);
        };

        match self.backend.get(&key).await {
            Ok(Some(envelope)) => {
                context_scope::record_cache_status(CacheStatus::Hit);
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit();
                }
                Ok(ReadOutcome::Hit(envelope))
            }
            Ok(None) => {
                if policy == CachePolicy::RequireCache {
                    return Err(PipelineError::cache_policy_violation(format!(
                        "REQUIRE_CACHE: no cache entry for key '{key}'"
                    )));
                }
                context_scope::record_cache_status(CacheStatus::Miss);
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_miss();
                }
                Ok(ReadOutcome::Miss)
            }
            Err(e) => {
                tracing::warn!(target: "pipeline::cache", error = %e, "cache backend fault on read, treating as miss");
                context_scope::record_cache_status(CacheStatus::Miss);
                Ok(ReadOutcome::Miss)
            }
        }
    }

    /// Writes `envelope` under the resolved key, per the plugin-driven write
    /// policies of §4.3. Backend faults are logged and swallowed; the
    /// caller's item is never affected by a write failure.
    pub async fn write_through(
        &self,
        item: &(dyn Any + Send + Sync),
        ctx: &PipelineContext,
        target: Option<&str>,
        configured_default: CachePolicy,
        envelope: CacheEnvelope,
    ) {
        let policy = ctx.effective_policy(configured_default);
        if policy == CachePolicy::BypassCache {
            return;
        }
        let Some(key) = self.resolve_key(item, ctx, target) else {
            return;
        };

        if policy == CachePolicy::SkipIfPresent {
            match self.backend.exists(&key).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(target: "pipeline::cache", error = %e, "cache backend fault checking existence");
                    return;
                }
            }
        }

        match self.backend.cache(&key, envelope, None).await {
            Ok(_) => {
                context_scope::record_cache_status(CacheStatus::Write);
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_write();
                }
            }
            Err(e) => {
                tracing::warn!(target: "pipeline::cache", error = %e, "cache backend fault on write, swallowed");
            }
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, PipelineError> {
        self.backend.invalidate(key).await
    }

    pub async fn invalidate_by_prefix(&self, prefix: &str) -> Result<u64, PipelineError> {
        self.backend.invalidate_by_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    struct NegatedKeyStrategy;
    impl CacheKeyStrategy for NegatedKeyStrategy {
        fn name(&self) -> &'static str {
            "negated"
        }
        fn priority(&self) -> i32 {
            10
        }
        fn derive_key(&self, item: &(dyn Any + Send + Sync)) -> Option<String> {
            item.downcast_ref::<i32>().map(|n| (-n).to_string())
        }
    }

    fn layer() -> CacheReadWriteLayer {
        let mut registry = KeyStrategyRegistry::new();
        registry.register(Arc::new(DecimalKeyStrategy));
        CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), registry)
    }

    #[tokio::test]
    async fn hit_returns_cached_envelope_without_invoking_step() {
        let layer = layer();
        let ctx = PipelineContext::new().with_cache_policy(CachePolicy::ReturnCached);
        let key = layer.resolve_key(&1i32, &ctx, None).unwrap();
        layer
            .backend
            .cache(&key, CacheEnvelope::json("i32", "42"), None)
            .await
            .unwrap();

        match layer.read_through(&1i32, &ctx, None, CachePolicy::CacheOnly).await.unwrap() {
            ReadOutcome::Hit(envelope) => assert_eq!(envelope.payload, "42"),
            _ => panic!("expected a hit"),
        }
    }

    #[tokio::test]
    async fn require_cache_without_key_is_a_policy_violation() {
        let layer = CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), KeyStrategyRegistry::new());
        let ctx = PipelineContext::new().with_cache_policy(CachePolicy::RequireCache);
        let result = layer.read_through(&1i32, &ctx, None, CachePolicy::CacheOnly).await;
        assert!(matches!(result, Err(PipelineError::CachePolicyViolation(_))));
    }

    #[tokio::test]
    async fn require_cache_miss_is_a_policy_violation() {
        let layer = layer();
        let ctx = PipelineContext::new().with_cache_policy(CachePolicy::RequireCache);
        let result = layer.read_through(&1i32, &ctx, None, CachePolicy::CacheOnly).await;
        assert!(matches!(result, Err(PipelineError::CachePolicyViolation(_))));
    }

    #[tokio::test]
    async fn key_generator_preference_overrides_priority_order() {
        let mut registry = KeyStrategyRegistry::new();
        registry.register(Arc::new(DecimalKeyStrategy));
        registry.register(Arc::new(NegatedKeyStrategy));
        let layer = CacheReadWriteLayer::new(Arc::new(InMemoryCacheBackend::new()), registry).with_key_generator("decimal");

        let ctx = PipelineContext::new();
        let key = layer.resolve_key(&5i32, &ctx, None).unwrap();
        assert_eq!(key.as_str(), "5");
    }

    #[tokio::test]
    async fn invalidate_by_prefix_removes_matching_entries_only() {
        let layer = layer();
        let key_a = CacheKey::resolve("a:1", None).unwrap();
        let key_b = CacheKey::resolve("b:1", None).unwrap();
        layer.backend.cache(&key_a, CacheEnvelope::json("x", "1"), None).await.unwrap();
        layer.backend.cache(&key_b, CacheEnvelope::json("x", "1"), None).await.unwrap();

        let removed = layer.invalidate_by_prefix("a:").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!layer.backend.exists(&key_a).await.unwrap());
        assert!(layer.backend.exists(&key_b).await.unwrap());
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Metrics (§4.9.5)
//!
//! A small fixed set of Prometheus counters and gauges the executor (C5),
//! cache layer (C3), output bus (C2), and resolver (C8) report through. The
//! core never starts an HTTP listener itself - [`RuntimeMetrics::render`]
//! returns the Prometheus text exposition format for an embedding
//! application to serve however it likes.

use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use pipeline_runtime_domain::error::PipelineError;

/// Process-wide metrics registry for one runner invocation.
#[derive(Clone)]
pub struct RuntimeMetrics {
    registry: Arc<Registry>,
    steps_invoked_total: IntCounterVec,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    cache_writes_total: IntCounter,
    bus_publishes_total: IntCounter,
    resolver_validation_failures_total: IntCounter,
}

impl RuntimeMetrics {
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();

        let steps_invoked_total = IntCounterVec::new(
            Opts::new("pipeline_steps_invoked_total", "Total step invocations by step id and shape"),
            &["step_id", "shape"],
        )
        .map_err(|e| PipelineError::backend_fault(format!("failed to create steps_invoked_total: {e}")))?;

        let cache_hits_total = IntCounter::new("pipeline_cache_hits_total", "Total cache read-through hits")
            .map_err(|e| PipelineError::backend_fault(format!("failed to create cache_hits_total: {e}")))?;
        let cache_misses_total = IntCounter::new("pipeline_cache_misses_total", "Total cache read-through misses")
            .map_err(|e| PipelineError::backend_fault(format!("failed to create cache_misses_total: {e}")))?;
        let cache_writes_total = IntCounter::new("pipeline_cache_writes_total", "Total cache writes")
            .map_err(|e| PipelineError::backend_fault(format!("failed to create cache_writes_total: {e}")))?;
        let bus_publishes_total = IntCounter::new("pipeline_bus_publishes_total", "Total output bus publishes")
            .map_err(|e| PipelineError::backend_fault(format!("failed to create bus_publishes_total: {e}")))?;
        let resolver_validation_failures_total = IntCounter::new(
            "pipeline_resolver_validation_failures_total",
            "Total runtime mapping validation failures",
        )
        .map_err(|e| PipelineError::backend_fault(format!("failed to create resolver_validation_failures_total: {e}")))?;

        registry
            .register(Box::new(steps_invoked_total.clone()))
            .map_err(|e| PipelineError::backend_fault(format!("failed to register steps_invoked_total: {e}")))?;
        registry
            .register(Box::new(cache_hits_total.clone()))
            .map_err(|e| PipelineError::backend_fault(format!("failed to register cache_hits_total: {e}")))?;
        registry
            .register(Box::new(cache_misses_total.clone()))
            .map_err(|e| PipelineError::backend_fault(format!("failed to register cache_misses_total: {e}")))?;
        registry
            .register(Box::new(cache_writes_total.clone()))
            .map_err(|e| PipelineError::backend_fault(format!("failed to register cache_writes_total: {e}")))?;
        registry
            .register(Box::new(bus_publishes_total.clone()))
            .map_err(|e| PipelineError::backend_fault(format!("failed to register bus_publishes_total: {e}")))?;
        registry
            .register(Box::new(resolver_validation_failures_total.clone()))
            .map_err(|e| {
                PipelineError::backend_fault(format!("failed to register resolver_validation_failures_total: {e}"))
            })?;

        Ok(Self {
            registry: Arc::new(registry),
            steps_invoked_total,
            cache_hits_total,
            cache_misses_total,
            cache_writes_total,
            bus_publishes_total,
            resolver_validation_failures_total,
        })
    }

    pub fn record_step_invoked(&self, step_id: &str, shape: &str) {
        self.steps_invoked_total.with_label_values(&[step_id, shape]).inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    pub fn record_cache_write(&self) {
        self.cache_writes_total.inc();
    }

    pub fn record_bus_publish(&self) {
        self.bus_publishes_total.inc();
    }

    pub fn record_resolver_validation_failure(&self) {
        self.resolver_validation_failures_total.inc();
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Renders the Prometheus text exposition format for this registry.
    pub fn render(&self) -> Result<String, PipelineError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| PipelineError::backend_fault(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| PipelineError::backend_fault(format!("metrics buffer not utf8: {e}")))
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration with fixed, non-conflicting names cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_recorded_counters() {
        let metrics = RuntimeMetrics::new().unwrap();
        metrics.record_step_invoked("resize", "OneToOne");
        metrics.record_cache_hit();
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("pipeline_steps_invoked_total"));
        assert!(rendered.contains("pipeline_cache_hits_total"));
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Context Scope (C1, §4.1)
//!
//! Binds the active [`PipelineContext`] for the duration of one step
//! invocation. The source system keys this by OS thread-local; under a
//! cooperative scheduler that isn't safe, since a step's `.await` points may
//! resume on a different worker thread than the one that suspended. This
//! implementation keys the binding to the *logical task* via
//! [`tokio::task_local!`] instead, which travels with the task across
//! worker-thread hops.
//!
//! `CacheStatusHolder` is a sibling task-local recording the last
//! [`CacheStatus`] observed in the active scope; it is purely observational
//! and never read by the executor's own control flow.

use std::cell::Cell;

use pipeline_runtime_domain::cache::CacheStatus;
use pipeline_runtime_domain::context::PipelineContext;

tokio::task_local! {
    static CONTEXT: Cell<Option<PipelineContext>>;
}

tokio::task_local! {
    static CACHE_STATUS: Cell<CacheStatus>;
}

/// Returns the `PipelineContext` bound to the currently executing task, or
/// `None` if no scope is active (e.g. code running outside the runner).
pub fn get() -> Option<PipelineContext> {
    CONTEXT.try_with(|cell| {
        let ctx = cell.take();
        cell.set(ctx.clone());
        ctx
    })
    .unwrap_or(None)
}

/// Records the last observed `CacheStatus` in the active scope. A no-op
/// outside a scope.
pub fn record_cache_status(status: CacheStatus) {
    let _ = CACHE_STATUS.try_with(|cell| cell.set(status));
}

/// Reads the last `CacheStatus` recorded in the active scope, defaulting to
/// `NONE` when nothing has been recorded yet or no scope is active.
pub fn cache_status() -> CacheStatus {
    CACHE_STATUS.try_with(|cell| cell.get()).unwrap_or(CacheStatus::None)
}

/// Runs `body` with `ctx` bound as the active context for the duration of
/// the future, restoring whatever was bound before on every exit path
/// (success, error, or cancellation) because the binding lives only for the
/// lifetime of the spawned scope future itself.
pub async fn scoped<F, T>(ctx: PipelineContext, body: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CONTEXT
        .scope(Cell::new(Some(ctx)), async {
            CACHE_STATUS.scope(Cell::new(CacheStatus::None), body).await
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_is_visible_inside_scope_and_absent_outside() {
        assert!(get().is_none());

        let ctx = PipelineContext::new().with_version_tag("v1");
        let observed = scoped(ctx, async {
            let inner = get();
            record_cache_status(CacheStatus::Hit);
            (inner, cache_status())
        })
        .await;

        assert_eq!(observed.0.unwrap().version_tag.as_deref(), Some("v1"));
        assert_eq!(observed.1, CacheStatus::Hit);
        assert!(get().is_none());
    }

    #[tokio::test]
    async fn nested_scopes_restore_the_outer_binding() {
        let outer = PipelineContext::new().with_version_tag("outer");
        scoped(outer, async {
            let inner = PipelineContext::new().with_version_tag("inner");
            scoped(inner, async {
                assert_eq!(get().unwrap().version_tag.as_deref(), Some("inner"));
            })
            .await;
            assert_eq!(get().unwrap().version_tag.as_deref(), Some("outer"));
        })
        .await;
    }
}

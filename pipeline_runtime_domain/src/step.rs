// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Shapes
//!
//! A step is an opaque unit of work with one of five *shapes*, each a
//! distinct async trait over [`ReactiveValue`]. Rather than a single trait
//! with a shape enum dispatched at runtime by matching on a tag (the source
//! system's approach, which loses type information), this crate models each
//! shape as its own trait and closes the set with [`StepInstance`], a tagged
//! enum holding one `Arc<dyn ...>` per shape. The executor's dispatch is then
//! a single `match` over five known variants.
//!
//! Steps may additionally implement [`Configurable`] (receives a config
//! block before first invocation), declare [`ParallelismHints`], opt out of
//! cache read-through via the [`CacheReadBypass`] marker, or declare a
//! [`crate::cache::CacheKeyTarget`] to steer key-strategy selection.
//!
//! An author implements the typed shape trait that matches their step
//! (`OneToOneStep<I, O>` and so on) rather than `DynStep` directly, and
//! wraps it in the matching adapter (`OneToOneAdapter`, ...) before handing
//! it to [`StepInstance::new`]. The adapter downcasts `DynItem` to the
//! step's declared `I`/`O` at the boundary, so step bodies never see
//! `Arc<dyn Any>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::reactive::{CancellationToken, SingleAsync, StreamAsync};

/// Stable identifier for a user-defined step, as it appears in the runtime
/// mapping file's `steps` section and in telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The five ways a step can relate its input reactive value to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepShape {
    OneToOne,
    OneToOneFuture,
    OneToMany,
    OneToManyBlocking,
    ManyToOne,
    ManyToMany,
}

impl StepShape {
    /// Shapes the classifier (C4) treats as parallel-by-default when a step
    /// declares no hints and the global policy is `AUTO`. Resolved per
    /// Open Question in `DESIGN.md`: this is deliberately *not* extended to
    /// `OneToOne`.
    pub fn is_auto_parallel_eligible(&self) -> bool {
        matches!(self, Self::OneToMany | Self::OneToManyBlocking)
    }
}

/// Ordering requirement a step declares about its own execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ordering {
    Relaxed,
    StrictAdvised,
    StrictRequired,
}

/// Whether a step's implementation is safe to invoke concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSafety {
    Safe,
    Unsafe,
}

/// Declared parallelism hints consulted by the classifier (C4).
#[derive(Debug, Clone, Copy)]
pub struct ParallelismHints {
    pub ordering: Ordering,
    pub thread_safety: ThreadSafety,
}

impl ParallelismHints {
    pub const fn new(ordering: Ordering, thread_safety: ThreadSafety) -> Self {
        Self { ordering, thread_safety }
    }
}

/// Marker trait: steps implementing this opt into a configuration block
/// delivered once, before the step's first invocation. Parameters are a
/// `HashMap<String, String>` - serializable to JSON/YAML without generic
/// type explosion, matching the `StageConfiguration.parameters` pattern this
/// crate's step shapes are modeled on.
pub trait Configurable: Send + Sync {
    fn configure(&self, params: &HashMap<String, String>) -> Result<(), PipelineError>;
}

/// Converts `HashMap<String, String>` parameters to a typed configuration
/// object, the same role `FromStr` plays for strings. Implemented by each
/// step's own config type; kept separate from [`Configurable`] so a step can
/// expose its parsed config type to callers that need it directly.
pub trait FromParameters: Sized {
    fn from_parameters(params: &HashMap<String, String>) -> Result<Self, PipelineError>;
}

/// Marker trait: steps implementing this never participate in cache
/// read-through, regardless of the effective `CachePolicy` (P4).
pub trait CacheReadBypass {}

/// Shared identity and hint surface every step instance exposes to the
/// classifier and executor, independent of its shape.
pub trait StepMeta: Send + Sync {
    fn id(&self) -> &StepId;
    fn shape(&self) -> StepShape;
    fn hints(&self) -> Option<ParallelismHints> {
        None
    }
    fn cache_read_bypass(&self) -> bool {
        false
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        None
    }
}

/// `SingleAsync<I> -> SingleAsync<O>`, lifted item-wise over streams by the
/// executor. Integrates with cache read-through (see `crate::cache`).
#[async_trait]
pub trait OneToOneStep<I, O>: StepMeta
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O, PipelineError>;
}

/// Same shape as [`OneToOneStep`], but the body is a future-style
/// computation that bypasses cache-read integration entirely (§9, reproduced
/// intentionally - see `DESIGN.md` for the Open Question resolution).
#[async_trait]
pub trait OneToOneFutureStep<I, O>: StepMeta
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O, PipelineError>;
}

/// `SingleAsync<I> -> StreamAsync<O>`.
#[async_trait]
pub trait OneToManyStep<I, O>: StepMeta
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I, cancel: CancellationToken) -> StreamAsync<O>;
}

/// Same shape as [`OneToManyStep`], but the body may block; the executor
/// must offload it to a blocking-capable worker and interrupt that worker on
/// cancellation.
#[async_trait]
pub trait OneToManyBlockingStep<I, O>: StepMeta
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn apply_blocking(&self, input: I) -> Result<Vec<O>, PipelineError>;
}

/// `StreamAsync<I> -> SingleAsync<O>`.
#[async_trait]
pub trait ManyToOneStep<I, O>: StepMeta
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: StreamAsync<I>) -> Result<O, PipelineError>;
}

/// `StreamAsync<I> -> StreamAsync<O>`, a whole-stream transform.
#[async_trait]
pub trait ManyToManyStep<I, O>: StepMeta
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: StreamAsync<I>) -> StreamAsync<O>;
}

/// Type-erased item flowing between steps. The runner's configured step list
/// is heterogeneous in the source system; this crate keeps that dynamism by
/// boxing every payload as `Arc<dyn Any + Send + Sync>` and letting each step
/// implementation downcast its own input/output type.
pub type DynItem = Arc<dyn std::any::Any + Send + Sync>;

/// Closed tagged variant over the five shapes, operating on [`DynItem`]
/// payloads. This is what the executor actually dispatches on - one
/// `Arc<dyn ...>` per shape, one `match` in the executor, no further
/// dynamic dispatch tricks.
#[async_trait]
pub trait DynStep: StepMeta {
    /// Delivers a configuration block before the step's first invocation.
    /// Default is a no-op; steps that implement [`Configurable`] override
    /// this to delegate to it.
    fn configure(&self, _params: &HashMap<String, String>) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn call_one_to_one(&self, _input: DynItem) -> Result<DynItem, PipelineError> {
        Err(PipelineError::precondition(format!("step '{}' is not OneToOne", self.id())))
    }

    async fn call_one_to_one_future(&self, _input: DynItem) -> Result<DynItem, PipelineError> {
        Err(PipelineError::precondition(format!(
            "step '{}' is not OneToOneFuture",
            self.id()
        )))
    }

    async fn call_one_to_many(&self, _input: DynItem, _cancel: CancellationToken) -> StreamAsync<DynItem> {
        StreamAsync::new(
            CancellationToken::new(),
            futures::stream::once(async { Err(PipelineError::precondition("step is not OneToMany")) }),
        )
    }

    fn call_one_to_many_blocking(&self, _input: DynItem) -> Result<Vec<DynItem>, PipelineError> {
        Err(PipelineError::precondition(format!(
            "step '{}' is not OneToManyBlocking",
            self.id()
        )))
    }

    async fn call_many_to_one(&self, _input: StreamAsync<DynItem>) -> Result<DynItem, PipelineError> {
        Err(PipelineError::precondition(format!("step '{}' is not ManyToOne", self.id())))
    }

    async fn call_many_to_many(&self, input: StreamAsync<DynItem>) -> StreamAsync<DynItem> {
        input
    }
}

fn downcast_input<I: Send + Sync + 'static>(item: DynItem, step_id: &StepId) -> Result<I, PipelineError> {
    let arc = item
        .downcast::<I>()
        .map_err(|_| PipelineError::precondition(format!("step '{step_id}' received an input of an unexpected type")))?;
    Arc::try_unwrap(arc).map_err(|_| PipelineError::precondition(format!("step '{step_id}' input is held elsewhere and cannot be consumed by value")))
}

fn box_output<O: Send + Sync + 'static>(output: O) -> DynItem {
    Arc::new(output)
}

fn map_result_stream<I, O, F>(stream: StreamAsync<I>, mut f: F) -> StreamAsync<O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    let (inner, cancel) = stream.into_inner();
    StreamAsync::new(cancel, futures::StreamExt::map(inner, move |r| r.map(&mut f)))
}

fn downcast_stream<I: Send + Sync + 'static>(stream: StreamAsync<DynItem>, step_id: &StepId) -> StreamAsync<I> {
    let step_id = step_id.clone();
    let (inner, cancel) = stream.into_inner();
    let mapped = futures::StreamExt::map(inner, move |item| item.and_then(|dyn_item| downcast_input::<I>(dyn_item, &step_id)));
    StreamAsync::new(cancel, mapped)
}

/// Bridges a statically-typed [`OneToOneStep`] into [`DynStep`], downcasting
/// `DynItem` to `I` and re-boxing the typed output. Construct with
/// `StepInstance::new(Arc::new(OneToOneAdapter::new(step)))`.
pub struct OneToOneAdapter<T, I, O>(T, std::marker::PhantomData<fn() -> (I, O)>);

impl<T, I, O> OneToOneAdapter<T, I, O> {
    pub fn new(inner: T) -> Self {
        Self(inner, std::marker::PhantomData)
    }
}

impl<T: StepMeta, I, O> StepMeta for OneToOneAdapter<T, I, O> {
    fn id(&self) -> &StepId {
        self.0.id()
    }
    fn shape(&self) -> StepShape {
        self.0.shape()
    }
    fn hints(&self) -> Option<ParallelismHints> {
        self.0.hints()
    }
    fn cache_read_bypass(&self) -> bool {
        self.0.cache_read_bypass()
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        self.0.cache_key_target()
    }
}

#[async_trait]
impl<T, I, O> DynStep for OneToOneAdapter<T, I, O>
where
    T: OneToOneStep<I, O>,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn call_one_to_one(&self, input: DynItem) -> Result<DynItem, PipelineError> {
        let typed = downcast_input::<I>(input, self.0.id())?;
        self.0.apply(typed).await.map(box_output)
    }
}

/// Bridges a statically-typed [`OneToOneFutureStep`] into [`DynStep`]. See
/// [`OneToOneAdapter`] for the bridging pattern.
pub struct OneToOneFutureAdapter<T, I, O>(T, std::marker::PhantomData<fn() -> (I, O)>);

impl<T, I, O> OneToOneFutureAdapter<T, I, O> {
    pub fn new(inner: T) -> Self {
        Self(inner, std::marker::PhantomData)
    }
}

impl<T: StepMeta, I, O> StepMeta for OneToOneFutureAdapter<T, I, O> {
    fn id(&self) -> &StepId {
        self.0.id()
    }
    fn shape(&self) -> StepShape {
        self.0.shape()
    }
    fn hints(&self) -> Option<ParallelismHints> {
        self.0.hints()
    }
    fn cache_read_bypass(&self) -> bool {
        self.0.cache_read_bypass()
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        self.0.cache_key_target()
    }
}

#[async_trait]
impl<T, I, O> DynStep for OneToOneFutureAdapter<T, I, O>
where
    T: OneToOneFutureStep<I, O>,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn call_one_to_one_future(&self, input: DynItem) -> Result<DynItem, PipelineError> {
        let typed = downcast_input::<I>(input, self.0.id())?;
        self.0.apply(typed).await.map(box_output)
    }
}

/// Bridges a statically-typed [`OneToManyStep`] into [`DynStep`]. See
/// [`OneToOneAdapter`] for the bridging pattern.
pub struct OneToManyAdapter<T, I, O>(T, std::marker::PhantomData<fn() -> (I, O)>);

impl<T, I, O> OneToManyAdapter<T, I, O> {
    pub fn new(inner: T) -> Self {
        Self(inner, std::marker::PhantomData)
    }
}

impl<T: StepMeta, I, O> StepMeta for OneToManyAdapter<T, I, O> {
    fn id(&self) -> &StepId {
        self.0.id()
    }
    fn shape(&self) -> StepShape {
        self.0.shape()
    }
    fn hints(&self) -> Option<ParallelismHints> {
        self.0.hints()
    }
    fn cache_read_bypass(&self) -> bool {
        self.0.cache_read_bypass()
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        self.0.cache_key_target()
    }
}

#[async_trait]
impl<T, I, O> DynStep for OneToManyAdapter<T, I, O>
where
    T: OneToManyStep<I, O>,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn call_one_to_many(&self, input: DynItem, cancel: CancellationToken) -> StreamAsync<DynItem> {
        let typed = match downcast_input::<I>(input, self.0.id()) {
            Ok(v) => v,
            Err(e) => return StreamAsync::new(CancellationToken::new(), futures::stream::once(async move { Err(e) })),
        };
        map_result_stream(self.0.apply(typed, cancel).await, box_output)
    }
}

/// Bridges a statically-typed [`OneToManyBlockingStep`] into [`DynStep`]. See
/// [`OneToOneAdapter`] for the bridging pattern.
pub struct OneToManyBlockingAdapter<T, I, O>(T, std::marker::PhantomData<fn() -> (I, O)>);

impl<T, I, O> OneToManyBlockingAdapter<T, I, O> {
    pub fn new(inner: T) -> Self {
        Self(inner, std::marker::PhantomData)
    }
}

impl<T: StepMeta, I, O> StepMeta for OneToManyBlockingAdapter<T, I, O> {
    fn id(&self) -> &StepId {
        self.0.id()
    }
    fn shape(&self) -> StepShape {
        self.0.shape()
    }
    fn hints(&self) -> Option<ParallelismHints> {
        self.0.hints()
    }
    fn cache_read_bypass(&self) -> bool {
        self.0.cache_read_bypass()
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        self.0.cache_key_target()
    }
}

#[async_trait]
impl<T, I, O> DynStep for OneToManyBlockingAdapter<T, I, O>
where
    T: OneToManyBlockingStep<I, O>,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn call_one_to_many_blocking(&self, input: DynItem) -> Result<Vec<DynItem>, PipelineError> {
        let typed = downcast_input::<I>(input, self.0.id())?;
        Ok(self.0.apply_blocking(typed)?.into_iter().map(box_output).collect())
    }
}

/// Bridges a statically-typed [`ManyToOneStep`] into [`DynStep`]. See
/// [`OneToOneAdapter`] for the bridging pattern.
pub struct ManyToOneAdapter<T, I, O>(T, std::marker::PhantomData<fn() -> (I, O)>);

impl<T, I, O> ManyToOneAdapter<T, I, O> {
    pub fn new(inner: T) -> Self {
        Self(inner, std::marker::PhantomData)
    }
}

impl<T: StepMeta, I, O> StepMeta for ManyToOneAdapter<T, I, O> {
    fn id(&self) -> &StepId {
        self.0.id()
    }
    fn shape(&self) -> StepShape {
        self.0.shape()
    }
    fn hints(&self) -> Option<ParallelismHints> {
        self.0.hints()
    }
    fn cache_read_bypass(&self) -> bool {
        self.0.cache_read_bypass()
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        self.0.cache_key_target()
    }
}

#[async_trait]
impl<T, I, O> DynStep for ManyToOneAdapter<T, I, O>
where
    T: ManyToOneStep<I, O>,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn call_many_to_one(&self, input: StreamAsync<DynItem>) -> Result<DynItem, PipelineError> {
        let typed = downcast_stream::<I>(input, self.0.id());
        self.0.apply(typed).await.map(box_output)
    }
}

/// Bridges a statically-typed [`ManyToManyStep`] into [`DynStep`]. See
/// [`OneToOneAdapter`] for the bridging pattern.
pub struct ManyToManyAdapter<T, I, O>(T, std::marker::PhantomData<fn() -> (I, O)>);

impl<T, I, O> ManyToManyAdapter<T, I, O> {
    pub fn new(inner: T) -> Self {
        Self(inner, std::marker::PhantomData)
    }
}

impl<T: StepMeta, I, O> StepMeta for ManyToManyAdapter<T, I, O> {
    fn id(&self) -> &StepId {
        self.0.id()
    }
    fn shape(&self) -> StepShape {
        self.0.shape()
    }
    fn hints(&self) -> Option<ParallelismHints> {
        self.0.hints()
    }
    fn cache_read_bypass(&self) -> bool {
        self.0.cache_read_bypass()
    }
    fn cache_key_target(&self) -> Option<&'static str> {
        self.0.cache_key_target()
    }
}

#[async_trait]
impl<T, I, O> DynStep for ManyToManyAdapter<T, I, O>
where
    T: ManyToManyStep<I, O>,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn call_many_to_many(&self, input: StreamAsync<DynItem>) -> StreamAsync<DynItem> {
        map_result_stream(self.0.apply(downcast_stream::<I>(input, self.0.id())).await, box_output)
    }
}

/// A configured step instance as the runner sees it: identity, shape, hints,
/// and the dynamically-dispatched body.
#[derive(Clone)]
pub struct StepInstance {
    pub inner: Arc<dyn DynStep>,
}

impl StepInstance {
    pub fn new(inner: Arc<dyn DynStep>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> &StepId {
        self.inner.id()
    }

    pub fn shape(&self) -> StepShape {
        self.inner.shape()
    }

    pub fn hints(&self) -> Option<ParallelismHints> {
        self.inner.hints()
    }

    pub fn cache_read_bypass(&self) -> bool {
        self.inner.cache_read_bypass()
    }

    pub fn cache_key_target(&self) -> Option<&'static str> {
        self.inner.cache_key_target()
    }

    pub fn configure(&self, params: &HashMap<String, String>) -> Result<(), PipelineError> {
        self.inner.configure(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    impl OneToOneStep<i32, i32> for Double {
        async fn apply(&self, input: i32) -> Result<i32, PipelineError> {
            Ok(input * 2)
        }
    }

    struct Repeat(StepId, usize);
    impl StepMeta for Repeat {
        fn id(&self) -> &StepId {
            &self.0
        }
        fn shape(&self) -> StepShape {
            StepShape::OneToMany
        }
    }
    #[async_trait]
    impl OneToManyStep<i32, i32> for Repeat {
        async fn apply(&self, input: i32, cancel: CancellationToken) -> StreamAsync<i32> {
            StreamAsync::from_vec(cancel, vec![input; self.1])
        }
    }

    #[tokio::test]
    async fn one_to_one_adapter_downcasts_and_reboxes() {
        let adapter = OneToOneAdapter::new(Double(StepId::new("double")));
        let output = adapter.call_one_to_one(Arc::new(21i32)).await.unwrap();
        assert_eq!(*output.downcast_ref::<i32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn one_to_one_adapter_rejects_wrong_input_type() {
        let adapter = OneToOneAdapter::new(Double(StepId::new("double")));
        let result = adapter.call_one_to_one(Arc::new("not an i32".to_string())).await;
        assert!(matches!(result, Err(PipelineError::Precondition(_))));
    }

    #[tokio::test]
    async fn one_to_many_adapter_downcasts_stream_items() {
        let adapter = OneToManyAdapter::new(Repeat(StepId::new("repeat"), 3));
        let stream = adapter.call_one_to_many(Arc::new(9i32), CancellationToken::new()).await;
        let items = stream.collect_vec().await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(*items[0].downcast_ref::<i32>().unwrap(), 9);
    }
}

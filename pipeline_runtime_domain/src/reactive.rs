// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Reactive Value Abstractions
//!
//! A `ReactiveValue` is either a [`SingleAsync`] (exactly one eventual value
//! or error) or a [`StreamAsync`] (zero or more values, terminated by
//! completion or error). Both carry a [`CancellationToken`]; streams
//! additionally carry their own backpressure via whatever channel produced
//! them (bounded `tokio::sync::mpsc` at the infrastructure boundary).
//!
//! These are deliberately thin wrappers over `futures::Future` /
//! `futures::Stream` boxed trait objects. The contract that matters is the
//! one the executor upholds - ordering, backpressure, cancellation - not the
//! concrete representation.

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use futures::FutureExt;
use futures::StreamExt;

use crate::error::PipelineError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send + 'a>>;

/// Cooperative cancellation signal shared between a runner invocation and
/// every step/cache operation it drives.
///
/// Thin hand-rolled wrapper kept in the domain crate so `Step` trait
/// signatures can carry it without pulling a tokio runtime into the domain;
/// `tokio-util`'s own `CancellationToken` provides the actual wait/notify
/// machinery underneath.
#[derive(Clone, Default)]
pub struct CancellationToken(tokio_util::sync::CancellationToken);

impl CancellationToken {
    pub fn new() -> Self {
        Self(tokio_util::sync::CancellationToken::new())
    }

    pub fn child_token(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}

/// Exactly one eventual value or error.
pub struct SingleAsync<T> {
    fut: BoxFuture<'static, T>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> SingleAsync<T> {
    pub fn new(cancel: CancellationToken, fut: impl Future<Output = Result<T, PipelineError>> + Send + 'static) -> Self {
        Self { fut: fut.boxed(), cancel }
    }

    /// An already-resolved single value, sharing the given cancellation scope.
    pub fn ready(cancel: CancellationToken, value: Result<T, PipelineError>) -> Self {
        Self::new(cancel, async move { value })
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Awaits the value, racing cancellation. A cancellation request yields
    /// `PipelineError::Cancelled` rather than hanging forever.
    pub async fn resolve(self) -> Result<T, PipelineError> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled("single value cancelled".into())),
            result = self.fut => result,
        }
    }

    pub fn map<U, F>(self, f: F) -> SingleAsync<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let cancel = self.cancel.clone();
        SingleAsync::new(cancel, self.fut.map(|r| r.map(f)))
    }
}

/// Zero or more values, terminated by completion or error.
pub struct StreamAsync<T> {
    stream: BoxStream<'static, Result<T, PipelineError>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> StreamAsync<T> {
    pub fn new(
        cancel: CancellationToken,
        stream: impl futures::Stream<Item = Result<T, PipelineError>> + Send + 'static,
    ) -> Self {
        Self {
            stream: stream.boxed(),
            cancel,
        }
    }

    pub fn empty(cancel: CancellationToken) -> Self {
        Self::new(cancel, futures::stream::empty())
    }

    pub fn from_vec(cancel: CancellationToken, items: Vec<T>) -> Self {
        Self::new(cancel, futures::stream::iter(items.into_iter().map(Ok)))
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn into_inner(self) -> (BoxStream<'static, Result<T, PipelineError>>, CancellationToken) {
        (self.stream, self.cancel)
    }

    /// Collects the whole stream, stopping early (with `Cancelled`) if the
    /// token fires before the stream completes.
    pub async fn collect_vec(self) -> Result<Vec<T>, PipelineError> {
        let cancel = self.cancel.clone();
        let mut stream = self.stream;
        let mut out = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled("stream cancelled".into())),
                next = stream.next() => match next {
                    Some(Ok(item)) => out.push(item),
                    Some(Err(e)) => return Err(e),
                    None => return Ok(out),
                },
            }
        }
    }
}

/// Either shape a runner can accept as its source, or produce as a step's
/// output. Anything else is a precondition error at the runner boundary.
pub enum ReactiveValue<T> {
    Single(SingleAsync<T>),
    Stream(StreamAsync<T>),
}

impl<T: Send + 'static> ReactiveValue<T> {
    pub fn cancellation(&self) -> &CancellationToken {
        match self {
            Self::Single(s) => s.cancellation(),
            Self::Stream(s) => s.cancellation(),
        }
    }

    /// Lifts a single value into a one-element stream, as required when a
    /// `ManyToOne`/`ManyToMany` step is fed a `SingleAsync` source.
    pub fn into_stream(self) -> StreamAsync<T> {
        match self {
            Self::Stream(s) => s,
            Self::Single(s) => {
                let cancel = s.cancellation().clone();
                StreamAsync::new(cancel, futures::stream::once(s.resolve()))
            }
        }
    }
}

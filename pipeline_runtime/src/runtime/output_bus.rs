// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Output Bus (C2, §4.2)
//!
//! Process-wide publish/subscribe for live pipeline outputs. Delivery is
//! best-effort live: a subscriber created after an item was published never
//! sees it. Items are type-erased (`DynItem`); `subscribe::<T>()` filters the
//! broadcast stream down to items that downcast to `T`.
//!
//! Built on [`tokio::sync::broadcast`], which already gives every subscriber
//! its own lagging cursor into a single bounded ring buffer - the natural
//! fit for "single publisher, many independent subscribers, bounded
//! backpressure" (§5 Shared resources (a)).

use std::any::Any;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;

use pipeline_runtime_domain::error::PipelineError;
use pipeline_runtime_domain::reactive::{CancellationToken, StreamAsync};
use pipeline_runtime_domain::step::DynItem;

/// What `publish` does when the internal ring buffer is full and the
/// slowest subscriber hasn't caught up. Configured at the connector level
/// (§4.2); the bus itself just enforces whichever policy it's given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Blocks the publisher until buffer space frees up (the default;
    /// `tokio::sync::broadcast` has no true blocking-send, so this is
    /// approximated by awaiting a permit-style yield loop).
    Buffer,
    /// Silently discards the item if the buffer is momentarily full.
    Drop,
    /// Fails the publish call outright.
    Fail,
}

/// Bounded attempts a `BUFFER` publish yields cooperatively for before giving
/// up and treating a permanently-full ring buffer as a bus fault.
const BUFFER_WAIT_ATTEMPTS: usize = 256;

/// In-memory publish/subscribe bus. One bus instance is process-wide; clone
/// it freely, every clone shares the same underlying channel.
#[derive(Clone)]
pub struct OutputBus {
    sender: broadcast::Sender<DynItem>,
    overflow: OverflowPolicy,
    capacity: usize,
}

impl OutputBus {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, overflow, capacity }
    }

    /// Whether the ring buffer holds as many unread messages as its capacity
    /// - the point at which the next send would force the slowest subscriber
    /// to lag. Meaningless with no subscribers at all, since nothing can lag.
    fn is_full(&self) -> bool {
        self.sender.receiver_count() > 0 && self.sender.len() >= self.capacity
    }

    /// Publishes one item. A `None` item is logged and dropped per §4.2.
    pub async fn publish(&self, item: Option<DynItem>) -> Result<(), PipelineError> {
        let Some(item) = item else {
            tracing::warn!(target: "pipeline::bus", "dropped a null publish");
            return Ok(());
        };

        if self.is_full() {
            match self.overflow {
                OverflowPolicy::Drop => {
                    tracing::debug!(target: "pipeline::bus", "overflow: dropped item");
                    return Ok(());
                }
                OverflowPolicy::Fail => {
                    return Err(PipelineError::bus_fault("publish failed: ring buffer is full"));
                }
                OverflowPolicy::Buffer => self.wait_for_space().await?,
            }
        }

        match self.sender.send(item) {
            Ok(_) => Ok(()),
            // No active subscribers is not a fault - best-effort delivery
            // means publishing into the void is a normal occurrence.
            Err(broadcast::error::SendError(_)) if self.sender.receiver_count() == 0 => Ok(()),
            Err(e) => Err(PipelineError::bus_fault(format!("publish failed: {e}"))),
        }
    }

    /// `tokio::sync::broadcast` has no blocking-send primitive, so `BUFFER`
    /// is approximated by cooperatively yielding until a subscriber catches
    /// up and frees ring buffer space, or the bus gives up after
    /// [`BUFFER_WAIT_ATTEMPTS`] yields.
    async fn wait_for_space(&self) -> Result<(), PipelineError> {
        for _ in 0..BUFFER_WAIT_ATTEMPTS {
            if !self.is_full() {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
        Err(PipelineError::bus_fault("publish failed: ring buffer never freed under BUFFER overflow policy"))
    }

    /// Subscribes to items assignable to `T`. Late subscribers do not see
    /// items published before this call.
    pub fn subscribe<T: Any + Send + Sync + 'static>(&self) -> StreamAsync<Arc<T>> {
        let receiver = self.sender.subscribe();
        let cancel = CancellationToken::new();
        let stream = tokio_stream_from_receiver(receiver).filter_map(|item| async move {
            match item {
                Ok(dyn_item) => dyn_item.downcast::<T>().ok().map(Ok),
                Err(_) => None,
            }
        });
        StreamAsync::new(cancel, stream)
    }

    /// Signals completion to all current and future subscribers by dropping
    /// the sender side. Idempotent: dropping twice is harmless.
    pub fn close(self) {
        drop(self.sender);
    }
}

fn tokio_stream_from_receiver(
    receiver: broadcast::Receiver<DynItem>,
) -> impl futures::Stream<Item = Result<DynItem, broadcast::error::RecvError>> {
    futures::stream::unfold(receiver, |mut rx| async move {
        match rx.recv().await {
            Ok(item) => Some((Ok(item), rx)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(e @ broadcast::error::RecvError::Lagged(_)) => Some((Err(e), rx)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_only_matching_type() {
        let bus = OutputBus::new(16, OverflowPolicy::Buffer);
        let mut ints: StreamAsync<Arc<i32>> = bus.subscribe::<i32>();

        bus.publish(Some(Arc::new(7i32))).await.unwrap();
        bus.publish(Some(Arc::new("not an int".to_string()))).await.unwrap();
        bus.publish(Some(Arc::new(9i32))).await.unwrap();
        drop(bus);

        let received = ints.collect_vec().await.unwrap();
        assert_eq!(received, vec![Arc::new(7), Arc::new(9)]);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_fail() {
        let bus = OutputBus::new(4, OverflowPolicy::Fail);
        assert!(bus.publish(Some(Arc::new(1i32))).await.is_ok());
    }

    #[tokio::test]
    async fn fail_overflow_policy_errors_once_the_ring_buffer_is_full() {
        let bus = OutputBus::new(1, OverflowPolicy::Fail);
        let _ints: StreamAsync<Arc<i32>> = bus.subscribe::<i32>();

        bus.publish(Some(Arc::new(1i32))).await.unwrap();
        let result = bus.publish(Some(Arc::new(2i32))).await;
        assert!(matches!(result, Err(PipelineError::BusFault(_))));
    }

    #[tokio::test]
    async fn drop_overflow_policy_silently_discards_once_full() {
        let bus = OutputBus::new(1, OverflowPolicy::Drop);
        let mut ints: StreamAsync<Arc<i32>> = bus.subscribe::<i32>();

        bus.publish(Some(Arc::new(1i32))).await.unwrap();
        bus.publish(Some(Arc::new(2i32))).await.unwrap();
        drop(bus);

        let received = ints.collect_vec().await.unwrap();
        assert_eq!(received, vec![Arc::new(1)]);
    }

    #[tokio::test]
    async fn buffer_overflow_policy_waits_for_a_reader_to_free_space() {
        let bus = OutputBus::new(1, OverflowPolicy::Buffer);
        let ints: StreamAsync<Arc<i32>> = bus.subscribe::<i32>();
        let (mut stream, _cancel) = ints.into_inner();

        bus.publish(Some(Arc::new(1i32))).await.unwrap();

        let reader = tokio::spawn(async move {
            let first = stream.next().await.unwrap().unwrap();
            let second = stream.next().await.unwrap().unwrap();
            (first, second)
        });

        // The second publish finds the buffer full and has to wait for the
        // reader above to drain the first item before it can proceed.
        bus.publish(Some(Arc::new(2i32))).await.unwrap();

        let (first, second) = reader.await.unwrap();
        assert_eq!((first, second), (Arc::new(1i32), Arc::new(2i32)));
    }

    #[tokio::test]
    async fn buffer_overflow_policy_fails_when_the_buffer_never_frees() {
        let bus = OutputBus::new(1, OverflowPolicy::Buffer);
        let _ints: StreamAsync<Arc<i32>> = bus.subscribe::<i32>();

        bus.publish(Some(Arc::new(1i32))).await.unwrap();
        let result = bus.publish(Some(Arc::new(2i32))).await;
        assert!(matches!(result, Err(PipelineError::BusFault(_))));
    }
}

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;

use crate::{QueueKeys, QueueResult};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// How a named collection is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Ordered sequence (source and error queues)
    List,
    /// Score-ordered set (processing queue)
    SortedSet,
}

/// Outcome of one reclaim pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Expired claims appended back to the source queue
    pub requeued: usize,
    /// Expired claims moved to the error queue by the delivery limit
    pub dead_lettered: usize,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.dead_lettered == 0
    }
}

/// One observation on a notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A message was published on the channel
    Message,
    /// The unsubscribe request has been confirmed; nothing more will arrive
    Unsubscribed,
}

/// A live subscription to a queue's notification channel
///
/// Messages that were already in flight when `unsubscribe` was requested may
/// still be delivered before `ChannelEvent::Unsubscribed`.
#[async_trait]
pub trait Subscription: Send {
    async fn next_event(&mut self) -> QueueResult<ChannelEvent>;

    async fn unsubscribe(&mut self) -> QueueResult<()>;
}

/// Shared store primitives the engine is built on
///
/// Every method taking `QueueKeys` runs as a single atomic unit in the store.
/// Deadlines and `now` are unix timestamps in seconds.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Prepare the atomic operations for a queue (script loading)
    async fn register(&self, keys: &QueueKeys) -> QueueResult<()>;

    /// Append a record to the source tail and publish on the queue channel
    async fn enqueue(&self, keys: &QueueKeys, record: &str) -> QueueResult<()>;

    /// Move the source head into processing with the given deadline
    ///
    /// Returns `None` on an empty source. A head record that has no usable id
    /// is moved to the error queue and still returned so the caller can
    /// surface the validation failure.
    async fn claim(&self, keys: &QueueKeys, deadline: i64) -> QueueResult<Option<String>>;

    /// Return every claim with `deadline <= now` to the source tail
    ///
    /// With `max_deliveries` set, claims delivered that many times go to the
    /// error queue instead.
    async fn reclaim(
        &self,
        keys: &QueueKeys,
        now: i64,
        max_deliveries: Option<u32>,
    ) -> QueueResult<ReclaimReport>;

    /// Remove a claim, provided it still carries `deadline`
    async fn ack(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool>;

    /// Move a claim to the error queue, provided it still carries `deadline`
    async fn fail(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool>;

    /// Number of entries in a collection
    async fn len(&self, name: &str, kind: CollectionKind) -> QueueResult<usize>;

    /// Entries of a collection in store order (records for lists, ids for sorted sets)
    async fn members(&self, name: &str, kind: CollectionKind) -> QueueResult<Vec<String>>;

    /// Delete the named collections in one step
    async fn flush(&self, names: &[String]) -> QueueResult<()>;

    /// Subscribe to a notification channel
    async fn subscribe(&self, channel: &str) -> QueueResult<Box<dyn Subscription>>;
}

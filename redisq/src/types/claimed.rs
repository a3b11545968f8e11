use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::{Item, ItemId};
use crate::{ops::AtomicOps, QueueError, QueueResult};

/// Settlement state of a claimed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Pending,
    Acked,
    Failed(String),
}

/// What an `each` handler decided for the item it was given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processing succeeded; remove the claim
    Ack,
    /// Processing failed for good; move the record to the error queue
    Fail(String),
    /// Leave the item as it is. Only valid after the handler settled it
    /// itself through `ClaimedItem::ack` or `ClaimedItem::fail`.
    Abandon,
}

/// An item held under a processing deadline
///
/// Settle it with `ack` or `fail` before the deadline passes; otherwise the
/// reclaimer puts it back on the source queue. Clones share the settlement.
#[derive(Clone)]
pub struct ClaimedItem {
    item: Item,
    deadline: DateTime<Utc>,
    ops: AtomicOps,
    settlement: Arc<Mutex<Settlement>>,
}

impl ClaimedItem {
    pub(crate) fn new(item: Item, deadline: DateTime<Utc>, ops: AtomicOps) -> Self {
        Self {
            item,
            deadline,
            ops,
            settlement: Arc::new(Mutex::new(Settlement::Pending)),
        }
    }

    pub fn id(&self) -> &ItemId {
        self.item.id()
    }

    pub fn payload(&self) -> &Value {
        self.item.payload()
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Instant after which the reclaimer may hand the item to someone else
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn settlement(&self) -> Settlement {
        self.settlement.lock().clone()
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.settlement.lock(), Settlement::Pending)
    }

    /// Mark the item done and remove it from processing
    ///
    /// Fails with `ClaimLost` when the claim already expired and was
    /// reclaimed; the item may then be processed again elsewhere. A store
    /// failure leaves the item pending so the call can be retried.
    pub async fn ack(&self) -> QueueResult<()> {
        self.settle(Settlement::Acked)?;
        let removed = self.ops.ack(self.id(), self.deadline).await;
        self.finish(removed)
    }

    /// Move the item to the error queue
    pub async fn fail(&self, reason: impl Into<String>) -> QueueResult<()> {
        let reason = reason.into();
        self.settle(Settlement::Failed(reason.clone()))?;
        let moved = self.ops.fail(self.id(), self.deadline, &reason).await;
        self.finish(moved)
    }

    fn settle(&self, outcome: Settlement) -> QueueResult<()> {
        let mut settlement = self.settlement.lock();
        if *settlement != Settlement::Pending {
            return Err(QueueError::AlreadySettled { id: self.id().clone() });
        }
        *settlement = outcome;
        Ok(())
    }

    fn finish(&self, applied: QueueResult<bool>) -> QueueResult<()> {
        match applied {
            Ok(true) => Ok(()),
            Ok(false) => Err(QueueError::ClaimLost { id: self.id().clone() }),
            Err(e) => {
                // Nothing changed in the store
                *self.settlement.lock() = Settlement::Pending;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ClaimedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimedItem")
            .field("item", &self.item)
            .field("deadline", &self.deadline)
            .field("settlement", &*self.settlement.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{memory::MemoryBackend, CollectionKind, QueueBackend, ReclaimReport, Subscription};
    use crate::observability::ObservabilityLayer;
    use crate::QueueKeys;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn claimed(backend: &MemoryBackend, deadline: DateTime<Utc>) -> ClaimedItem {
        let ops = AtomicOps::register(
            Arc::new(backend.clone()),
            QueueKeys::new("claims"),
            None,
            ObservabilityLayer::default(),
        )
        .await
        .unwrap();
        ops.enqueue(&Item::new(json!({"n": 1}))).await.unwrap();
        let record = ops.claim(deadline).await.unwrap().unwrap();
        ClaimedItem::new(Item::decode(&record).unwrap(), deadline, ops)
    }

    fn in_an_hour() -> DateTime<Utc> {
        let at = Utc::now() + chrono::Duration::hours(1);
        DateTime::from_timestamp(at.timestamp(), 0).unwrap()
    }

    #[tokio::test]
    async fn ack_removes_the_claim() {
        let backend = MemoryBackend::new();
        let item = claimed(&backend, in_an_hour()).await;

        item.ack().await.unwrap();

        assert!(item.is_settled());
        assert_eq!(backend.len("claims_processing", CollectionKind::SortedSet).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_settlement_is_rejected() {
        let backend = MemoryBackend::new();
        let item = claimed(&backend, in_an_hour()).await;
        item.fail("bad input").await.unwrap();

        let err = item.ack().await.unwrap_err();

        assert!(matches!(err, QueueError::AlreadySettled { .. }));
        assert_eq!(item.settlement(), Settlement::Failed("bad input".to_string()));
        assert_eq!(backend.len("claims_error", CollectionKind::List).await.unwrap(), 1);
    }

    /// Store whose first `ack` fails with a transient error
    struct FlakyStore {
        inner: MemoryBackend,
        ack_failed: AtomicBool,
    }

    #[async_trait]
    impl QueueBackend for FlakyStore {
        async fn register(&self, keys: &QueueKeys) -> QueueResult<()> {
            self.inner.register(keys).await
        }

        async fn enqueue(&self, keys: &QueueKeys, record: &str) -> QueueResult<()> {
            self.inner.enqueue(keys, record).await
        }

        async fn claim(&self, keys: &QueueKeys, deadline: i64) -> QueueResult<Option<String>> {
            self.inner.claim(keys, deadline).await
        }

        async fn reclaim(&self, keys: &QueueKeys, now: i64, max_deliveries: Option<u32>) -> QueueResult<ReclaimReport> {
            self.inner.reclaim(keys, now, max_deliveries).await
        }

        async fn ack(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool> {
            if !self.ack_failed.swap(true, Ordering::SeqCst) {
                return Err(QueueError::Store("connection reset".to_string()));
            }
            self.inner.ack(keys, id, deadline).await
        }

        async fn fail(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool> {
            self.inner.fail(keys, id, deadline).await
        }

        async fn len(&self, name: &str, kind: CollectionKind) -> QueueResult<usize> {
            self.inner.len(name, kind).await
        }

        async fn members(&self, name: &str, kind: CollectionKind) -> QueueResult<Vec<String>> {
            self.inner.members(name, kind).await
        }

        async fn flush(&self, names: &[String]) -> QueueResult<()> {
            self.inner.flush(names).await
        }

        async fn subscribe(&self, channel: &str) -> QueueResult<Box<dyn Subscription>> {
            self.inner.subscribe(channel).await
        }
    }

    #[tokio::test]
    async fn ack_can_be_retried_after_a_store_error() {
        let memory = MemoryBackend::new();
        let store = FlakyStore {
            inner: memory.clone(),
            ack_failed: AtomicBool::new(false),
        };
        let ops = AtomicOps::register(Arc::new(store), QueueKeys::new("claims"), None, ObservabilityLayer::default())
            .await
            .unwrap();
        ops.enqueue(&Item::new(json!("retry me"))).await.unwrap();
        let deadline = in_an_hour();
        let record = ops.claim(deadline).await.unwrap().unwrap();
        let item = ClaimedItem::new(Item::decode(&record).unwrap(), deadline, ops);

        let err = item.ack().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!item.is_settled());

        item.ack().await.unwrap();
        assert_eq!(item.settlement(), Settlement::Acked);
        assert_eq!(memory.len("claims_processing", CollectionKind::SortedSet).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ack_after_reclaim_reports_lost_claim() {
        let backend = MemoryBackend::new();
        let past = DateTime::from_timestamp(Utc::now().timestamp() - 5, 0).unwrap();
        let item = claimed(&backend, past).await;
        backend.reclaim(&QueueKeys::new("claims"), Utc::now().timestamp(), None).await.unwrap();

        let err = item.ack().await.unwrap_err();

        assert!(matches!(err, QueueError::ClaimLost { .. }));
        assert_eq!(backend.len("claims", CollectionKind::List).await.unwrap(), 1);
    }
}

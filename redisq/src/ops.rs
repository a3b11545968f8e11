use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    backend::{QueueBackend, ReclaimReport},
    observability::ObservabilityLayer,
    Item, ItemId, QueueKeys, QueueResult,
};

/// The atomic operations of one queue, bound to its key names
///
/// Every mutation of the source, processing and error collections goes
/// through here; each call is a single atomic unit in the store.
#[derive(Clone)]
pub struct AtomicOps {
    backend: Arc<dyn QueueBackend>,
    keys: Arc<QueueKeys>,
    max_deliveries: Option<u32>,
    observability: ObservabilityLayer,
}

impl AtomicOps {
    /// Bind the operations to `keys` and prepare them in the store
    pub async fn register(
        backend: Arc<dyn QueueBackend>,
        keys: QueueKeys,
        max_deliveries: Option<u32>,
        observability: ObservabilityLayer,
    ) -> QueueResult<Self> {
        backend.register(&keys).await?;
        debug!("Registered atomic operations for queue {}", keys.source);

        Ok(Self {
            backend,
            keys: Arc::new(keys),
            max_deliveries,
            observability,
        })
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Append an item to the source queue and wake waiting consumers
    pub async fn enqueue(&self, item: &Item) -> QueueResult<()> {
        let record = item.encode()?;
        self.backend.enqueue(&self.keys, &record).await?;
        self.observability.record_enqueued(&self.keys.source, item.id());
        Ok(())
    }

    /// Move the source head into processing until `deadline`
    ///
    /// Returns the raw record; `None` means the source is empty.
    pub async fn claim(&self, deadline: DateTime<Utc>) -> QueueResult<Option<String>> {
        self.backend.claim(&self.keys, deadline.timestamp()).await
    }

    /// Return claims whose deadline is at or before `now` to circulation
    pub async fn reclaim(&self, now: DateTime<Utc>) -> QueueResult<ReclaimReport> {
        let report = self
            .backend
            .reclaim(&self.keys, now.timestamp(), self.max_deliveries)
            .await?;

        if report.dead_lettered > 0 {
            warn!(
                "Moved {} items of {} to {} after {:?} deliveries",
                report.dead_lettered, self.keys.source, self.keys.error, self.max_deliveries
            );
        }
        self.observability.record_reclaimed(report);
        Ok(report)
    }

    /// Remove a claim; `false` when it no longer carries `deadline`
    pub async fn ack(&self, id: &ItemId, deadline: DateTime<Utc>) -> QueueResult<bool> {
        let removed = self.backend.ack(&self.keys, id.as_str(), deadline.timestamp()).await?;
        if removed {
            self.observability.record_acked(id);
        }
        Ok(removed)
    }

    /// Move a claim to the error queue; `false` when it no longer carries `deadline`
    pub async fn fail(&self, id: &ItemId, deadline: DateTime<Utc>, reason: &str) -> QueueResult<bool> {
        let moved = self.backend.fail(&self.keys, id.as_str(), deadline.timestamp()).await?;
        if moved {
            self.observability.record_failed(id, reason);
        }
        Ok(moved)
    }

    pub(crate) fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }
}

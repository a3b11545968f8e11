use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use crate::{backend::BoxStream, ItemId, QueueEvent, ReclaimReport};

use super::LiveMetrics;

/// Event broadcaster and counters shared by an engine and its claimed items
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<QueueEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new(capacity: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(capacity);

        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    pub fn record_enqueued(&self, queue: &str, item_id: &ItemId) {
        self.metrics.increment_pushed();
        self.emit(QueueEvent::Enqueued {
            item_id: item_id.clone(),
            queue: queue.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_claimed(&self, item_id: &ItemId, deadline: DateTime<Utc>) {
        self.metrics.increment_claimed();
        self.emit(QueueEvent::Claimed {
            item_id: item_id.clone(),
            deadline,
            at: Utc::now(),
        });
    }

    pub fn record_acked(&self, item_id: &ItemId) {
        self.metrics.increment_acked();
        self.emit(QueueEvent::Acked {
            item_id: item_id.clone(),
            at: Utc::now(),
        });
    }

    pub fn record_failed(&self, item_id: &ItemId, reason: &str) {
        self.metrics.increment_failed();
        self.emit(QueueEvent::Failed {
            item_id: item_id.clone(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_invalid(&self) {
        self.metrics.increment_invalid();
    }

    pub fn record_reclaimed(&self, report: ReclaimReport) {
        if report.is_empty() {
            return;
        }
        self.metrics.add_reclaimed(report.requeued, report.dead_lettered);
        self.emit(QueueEvent::Reclaimed {
            requeued: report.requeued,
            dead_lettered: report.dead_lettered,
            at: Utc::now(),
        });
    }

    /// Subscribe to events emitted from now on
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|result| result.ok());
        Box::pin(stream)
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }

    fn emit(&self, event: QueueEvent) {
        debug!("Queue event: {}", event.event_name());
        // No receivers is fine
        let _ = self.event_broadcaster.send(event);
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_events_to_subscribers() {
        let layer = ObservabilityLayer::default();
        let mut events = layer.event_stream();
        let id = ItemId::from("a");

        layer.record_enqueued("jobs", &id);
        layer.record_acked(&id);

        let first = events.next().await.unwrap();
        assert_eq!(first.event_name(), "enqueued");
        assert_eq!(first.item_id(), Some(&id));
        assert_eq!(events.next().await.unwrap().event_name(), "acked");
        assert_eq!(layer.metrics().snapshot().acked, 1);
    }

    #[tokio::test]
    async fn empty_reclaim_is_not_an_event() {
        let layer = ObservabilityLayer::default();
        layer.record_reclaimed(ReclaimReport::default());
        assert_eq!(layer.metrics().snapshot().requeued, 0);
    }
}

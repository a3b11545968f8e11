use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::{BoxStream, CollectionKind, QueueBackend, ReclaimReport},
    config::QueueConfig,
    notify::wait_for_notification,
    observability::{MetricsSnapshot, ObservabilityLayer},
    ops::AtomicOps,
    queue::Queue,
    reaper::{Reclaimer, ReclaimerHandle},
    ClaimedItem, Disposition, Item, ItemId, QueueError, QueueEvent, QueueKeys, QueueResult,
};

/// Reliable work queue over a shared store
///
/// Items move from the source queue into processing when claimed and leave
/// processing when acknowledged, failed or reclaimed. A background
/// reclaimer owned by the engine returns expired claims to the source queue
/// until `shutdown` is called or the engine is dropped.
pub struct Engine {
    name: String,
    source: Queue,
    processing: Queue,
    error: Queue,
    ops: AtomicOps,
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
    reclaimer: Option<ReclaimerHandle>,
}

impl Engine {
    /// Connect to the Redis instance at `config.redis_url`
    #[cfg(feature = "redis")]
    pub async fn connect(name: &str, config: QueueConfig) -> QueueResult<Self> {
        let backend = crate::backend::redis::RedisBackend::connect(&config.redis_url).await?;
        Self::with_backend(name, Arc::new(backend), config).await
    }

    /// Run the engine over any store implementing `QueueBackend`
    pub async fn with_backend(
        name: &str,
        backend: Arc<dyn QueueBackend>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        config.validate()?;

        let keys = QueueKeys::new(name);
        let observability = ObservabilityLayer::new(config.event_capacity);
        let ops = AtomicOps::register(
            backend.clone(),
            keys.clone(),
            config.max_deliveries,
            observability,
        )
        .await?;

        let source = Queue::new(keys.source.clone(), CollectionKind::List, backend.clone());
        let processing = Queue::new(keys.processing.clone(), CollectionKind::SortedSet, backend.clone())
            .with_companions(vec![keys.processing_items.clone(), keys.deliveries.clone()]);
        let error = Queue::new(keys.error.clone(), CollectionKind::List, backend.clone());

        let reclaimer = Reclaimer::with_interval(ops.clone(), config.reclaim_interval).spawn();
        info!("Queue engine {} started", name);

        Ok(Self {
            name: name.to_string(),
            source,
            processing,
            error,
            ops,
            backend,
            config,
            reclaimer: Some(reclaimer),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn source_queue(&self) -> &Queue {
        &self.source
    }

    pub fn processing_queue(&self) -> &Queue {
        &self.processing
    }

    pub fn error_queue(&self) -> &Queue {
        &self.error
    }

    /// Enqueue a payload and return the id assigned to it
    #[instrument(skip(self, payload), fields(queue = %self.name))]
    pub async fn push(&self, payload: Value) -> QueueResult<ItemId> {
        let item = Item::new(payload);
        self.ops.enqueue(&item).await?;
        debug!("Pushed item {}", item.id());
        Ok(item.id().clone())
    }

    /// Enqueue any serializable payload
    pub async fn push_json<T: Serialize>(&self, payload: &T) -> QueueResult<ItemId> {
        self.push(serde_json::to_value(payload)?).await
    }

    /// Claim the next item, waiting up to `timeout` for one to show up
    ///
    /// The claim expires `timeout` after it is taken; settle it before then
    /// or the reclaimer hands it to another consumer. Only the idle wait
    /// counts against the wait budget; a claim already in flight is never
    /// abandoned halfway.
    pub async fn pop(&self, timeout: Duration) -> QueueResult<ClaimedItem> {
        self.pop_with(timeout, timeout).await
    }

    /// `pop` with the wait budget and the claim lifetime set separately
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn pop_with(&self, wait: Duration, processing_timeout: Duration) -> QueueResult<ClaimedItem> {
        self.claim_next(processing_timeout, Some(wait)).await
    }

    /// Claim the next item if one is pending, without waiting
    pub async fn try_pop(&self) -> QueueResult<Option<ClaimedItem>> {
        self.ops.reclaim(Utc::now()).await?;
        self.claim_once(self.config.processing_timeout).await
    }

    /// Hand every item to `handler`, forever
    ///
    /// Each claim lives for `processing_timeout` and the handler is
    /// cancelled once that elapses. Returns on the first error: a handler
    /// timeout, an invalid record, an `Abandon` on an unsettled item, or a
    /// store failure.
    pub async fn each<F, Fut>(&self, processing_timeout: Duration, mut handler: F) -> QueueResult<()>
    where
        F: FnMut(ClaimedItem) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        info!("Consuming {} with processing timeout {:?}", self.name, processing_timeout);

        loop {
            let item = self.claim_next(processing_timeout, None).await?;
            let work = handler(item.clone());
            self.dispatch(&item, processing_timeout, work).await?;
        }
    }

    /// `each` with the configured processing timeout
    pub async fn run<F, Fut>(&self, handler: F) -> QueueResult<()>
    where
        F: FnMut(ClaimedItem) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        self.each(self.config.processing_timeout, handler).await
    }

    /// Number of pending items
    pub async fn length(&self) -> QueueResult<usize> {
        self.source.length().await
    }

    pub async fn any(&self) -> QueueResult<bool> {
        self.source.any().await
    }

    /// Drop every pending item; claims and errors stay
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn flush(&self) -> QueueResult<()> {
        self.source.flush().await?;
        info!("Flushed source queue {}", self.name);
        Ok(())
    }

    /// Drop the source, processing and error queues in one step
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn flush_all(&self) -> QueueResult<()> {
        self.backend.flush(&self.ops.keys().all()).await?;
        info!("Flushed all collections of {}", self.name);
        Ok(())
    }

    /// Run one reclaim pass now
    pub async fn reclaim(&self) -> QueueResult<ReclaimReport> {
        self.reclaim_at(Utc::now()).await
    }

    /// Run one reclaim pass as if the clock read `now`
    pub async fn reclaim_at(&self, now: DateTime<Utc>) -> QueueResult<ReclaimReport> {
        self.ops.reclaim(now).await
    }

    /// Events emitted by this engine from now on
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        self.ops.observability().event_stream()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ops.observability().metrics().snapshot()
    }

    /// Stop the background reclaimer and wait for it
    ///
    /// The engine stays usable; expired claims are then only reclaimed by
    /// `pop`, `try_pop` and `each`, or by other engines on the same queue.
    pub async fn shutdown(&mut self) -> QueueResult<()> {
        let handle = self.reclaimer.take().ok_or(QueueError::Shutdown)?;
        handle.shutdown().await?;
        info!("Queue engine {} shut down", self.name);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.reclaimer.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Reclaim once, then claim or wait for a notification until an item
    /// comes up or `wait` runs out
    async fn claim_next(&self, processing_timeout: Duration, wait: Option<Duration>) -> QueueResult<ClaimedItem> {
        let give_up_at = wait.map(|wait| Instant::now() + wait);
        self.ops.reclaim(Utc::now()).await?;

        loop {
            if let Some(item) = self.claim_once(processing_timeout).await? {
                return Ok(item);
            }

            // Subscribe before the second attempt so a push landing in
            // between still wakes us
            let mut subscription = self.backend.subscribe(&self.ops.keys().channel).await?;
            if let Some(item) = self.claim_once(processing_timeout).await? {
                return Ok(item);
            }

            debug!("Queue {} is empty, waiting for a notification", self.name);
            let waiting = wait_for_notification(subscription.as_mut());
            match (give_up_at, wait) {
                (Some(at), Some(wait)) => match tokio::time::timeout_at(at, waiting).await {
                    Ok(observed) => {
                        observed?;
                    }
                    Err(_) => return Err(QueueError::WaitTimeout(wait)),
                },
                _ => {
                    waiting.await?;
                }
            }
        }
    }

    async fn claim_once(&self, processing_timeout: Duration) -> QueueResult<Option<ClaimedItem>> {
        let deadline = deadline_after(processing_timeout)?;
        let Some(record) = self.ops.claim(deadline).await? else {
            return Ok(None);
        };

        match Item::decode(&record) {
            Ok(item) => {
                debug!("Claimed item {} until {}", item.id(), deadline);
                self.ops.observability().record_claimed(item.id(), deadline);
                Ok(Some(ClaimedItem::new(item, deadline, self.ops.clone())))
            }
            Err(e) => {
                // The store already moved the record to the error queue
                warn!("Moved invalid record from {} to {}: {}", self.name, self.ops.keys().error, e);
                self.ops.observability().record_invalid();
                Err(match e {
                    QueueError::InvalidItem(reason) => QueueError::InvalidItem(reason),
                    other => QueueError::InvalidItem(other.to_string()),
                })
            }
        }
    }

    async fn dispatch<Fut>(&self, item: &ClaimedItem, processing_timeout: Duration, work: Fut) -> QueueResult<()>
    where
        Fut: Future<Output = Disposition>,
    {
        let id = item.id().clone();
        let disposition = match tokio::time::timeout(processing_timeout, work).await {
            Ok(disposition) => disposition,
            Err(_) => {
                warn!("Handler for {} exceeded {:?}", id, processing_timeout);
                return Err(QueueError::ProcessingTimeout {
                    id,
                    timeout: processing_timeout,
                });
            }
        };

        let settled = match disposition {
            Disposition::Ack => item.ack().await,
            Disposition::Fail(reason) => item.fail(reason).await,
            Disposition::Abandon if item.is_settled() => Ok(()),
            Disposition::Abandon => {
                error!("Handler returned without settling {}", id);
                return Err(QueueError::DanglingItem { id });
            }
        };

        match settled {
            Err(QueueError::ClaimLost { id }) => {
                warn!("Claim on {} expired before it was settled; it may be delivered again", id);
                Ok(())
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// `now + timeout`, rounded up to the second resolution the store keeps
fn deadline_after(timeout: Duration) -> QueueResult<DateTime<Utc>> {
    let timeout = chrono::Duration::from_std(timeout)
        .map_err(|e| QueueError::Config(format!("processing timeout out of range: {}", e)))?;
    let at = Utc::now() + timeout;
    let secs = at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| QueueError::Config(format!("deadline out of range: {}", at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use serde_json::json;

    async fn engine(backend: &MemoryBackend) -> Engine {
        Engine::with_backend("unit", Arc::new(backend.clone()), QueueConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn deadline_has_second_resolution() {
        let deadline = deadline_after(Duration::from_secs(30)).unwrap();
        assert_eq!(deadline.timestamp_subsec_nanos(), 0);
        assert!(deadline > Utc::now());
    }

    #[test]
    fn sub_second_timeout_never_lands_in_the_past() {
        let before = Utc::now();
        let deadline = deadline_after(Duration::from_millis(10)).unwrap();
        assert!(deadline >= before + chrono::Duration::milliseconds(10));
    }

    #[tokio::test]
    async fn pop_timeout_sets_the_claim_deadline() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend).await;
        engine.push(json!("short")).await.unwrap();

        let item = engine.pop(Duration::from_secs(1)).await.unwrap();

        let lifetime = item.deadline() - Utc::now();
        assert!(lifetime <= chrono::Duration::seconds(2));
        assert_eq!(
            backend.claim_deadline(engine.ops.keys(), item.id().as_str()),
            Some(item.deadline().timestamp())
        );
    }

    #[tokio::test]
    async fn try_pop_on_empty_queue_returns_none() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend).await;

        assert!(engine.try_pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_deadline_matches_the_store() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend).await;
        engine.push(json!("x")).await.unwrap();

        let item = engine.try_pop().await.unwrap().unwrap();

        assert_eq!(
            backend.claim_deadline(engine.ops.keys(), item.id().as_str()),
            Some(item.deadline().timestamp())
        );
    }

    #[tokio::test]
    async fn ack_disposition_on_settled_item_is_an_error() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend).await;
        engine.push(json!("x")).await.unwrap();
        let item = engine.try_pop().await.unwrap().unwrap();
        item.ack().await.unwrap();

        let result = engine
            .dispatch(&item, Duration::from_secs(1), async { Disposition::Ack })
            .await;

        assert!(matches!(result, Err(QueueError::AlreadySettled { .. })));
    }

    #[tokio::test]
    async fn shutdown_twice_reports_shutdown() {
        let backend = MemoryBackend::new();
        let mut engine = engine(&backend).await;

        engine.shutdown().await.unwrap();

        assert!(!engine.is_running());
        assert!(matches!(engine.shutdown().await, Err(QueueError::Shutdown)));
    }
}

use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{config::DEFAULT_RECLAIM_INTERVAL, ops::AtomicOps, QueueError, QueueResult, ReclaimReport};

/// Periodic reclaim pass returning expired claims to circulation
pub struct Reclaimer {
    ops: AtomicOps,
    interval: Duration,
}

impl Reclaimer {
    pub fn new(ops: AtomicOps) -> Self {
        Self {
            ops,
            interval: DEFAULT_RECLAIM_INTERVAL,
        }
    }

    pub fn with_interval(ops: AtomicOps, interval: Duration) -> Self {
        Self { ops, interval }
    }

    /// Run one reclaim cycle
    pub async fn tick(&self) -> QueueResult<ReclaimReport> {
        let report = self.ops.reclaim(Utc::now()).await?;
        if report.is_empty() {
            debug!("No expired claims on {}", self.ops.keys().processing);
        } else {
            info!(
                "Reclaimed expired claims on {}: {} requeued, {} dead-lettered",
                self.ops.keys().processing,
                report.requeued,
                report.dead_lettered
            );
        }
        Ok(report)
    }

    /// Start the loop on the current runtime
    pub fn spawn(self) -> ReclaimerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(self.run(shutdown_rx));

        ReclaimerHandle {
            shutdown_tx,
            join_handle,
        }
    }

    /// Loop until the shutdown signal fires or its sender is dropped
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Starting reclaimer for {} with interval: {:?}",
            self.ops.keys().source,
            self.interval
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        // A dead reclaimer silently stops all timeout recovery
                        warn!("Error during reclaim pass on {}: {}", self.ops.keys().source, e);
                    }
                }
            }
        }

        info!("Reclaimer for {} stopped", self.ops.keys().source);
    }
}

/// Handle owning a running reclaim loop
///
/// Dropping the handle stops the loop at its next wakeup.
pub struct ReclaimerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Signal the loop to stop and wait for it
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Reclaimer join error: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{memory::MemoryBackend, CollectionKind, QueueBackend};
    use crate::observability::ObservabilityLayer;
    use crate::{Item, QueueKeys};
    use serde_json::json;
    use std::sync::Arc;
    use tracing_test::traced_test;

    async fn ops(backend: &MemoryBackend) -> AtomicOps {
        AtomicOps::register(
            Arc::new(backend.clone()),
            QueueKeys::new("reaper"),
            None,
            ObservabilityLayer::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn tick_requeues_expired_claims() {
        let backend = MemoryBackend::new();
        let ops = ops(&backend).await;
        ops.enqueue(&Item::new(json!("late"))).await.unwrap();
        ops.claim(Utc::now() - chrono::Duration::seconds(5)).await.unwrap().unwrap();

        let report = Reclaimer::new(ops.clone()).tick().await.unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(backend.len("reaper", CollectionKind::List).await.unwrap(), 1);
        assert!(logs_contain("1 requeued"));
    }

    #[tokio::test]
    async fn repeated_tick_is_a_no_op() {
        let backend = MemoryBackend::new();
        let ops = ops(&backend).await;
        ops.enqueue(&Item::new(json!("late"))).await.unwrap();
        ops.claim(Utc::now() - chrono::Duration::seconds(5)).await.unwrap();
        let reclaimer = Reclaimer::new(ops);

        reclaimer.tick().await.unwrap();
        let before = backend.members("reaper", CollectionKind::List).await.unwrap();
        let second = reclaimer.tick().await.unwrap();

        assert!(second.is_empty());
        assert_eq!(backend.members("reaper", CollectionKind::List).await.unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_until_shutdown() {
        let backend = MemoryBackend::new();
        let ops = ops(&backend).await;
        let handle = Reclaimer::with_interval(ops.clone(), Duration::from_secs(10)).spawn();

        ops.enqueue(&Item::new(json!("stalled"))).await.unwrap();
        ops.claim(Utc::now() - chrono::Duration::seconds(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(backend.len("reaper", CollectionKind::List).await.unwrap(), 1);
        assert!(!handle.is_finished());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_loop() {
        let backend = MemoryBackend::new();
        let handle = Reclaimer::new(ops(&backend).await).spawn();
        let ReclaimerHandle { shutdown_tx, join_handle } = handle;

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), join_handle)
            .await
            .unwrap()
            .unwrap();
    }
}

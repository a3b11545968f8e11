use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Live counters for one engine's queue operations
#[derive(Debug, Default)]
pub struct LiveMetrics {
    items_pushed: AtomicU64,
    items_claimed: AtomicU64,
    items_acked: AtomicU64,
    items_failed: AtomicU64,
    items_requeued: AtomicU64,
    items_dead_lettered: AtomicU64,
    invalid_records: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_pushed(&self) {
        self.items_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_claimed(&self) {
        self.items_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_acked(&self) {
        self.items_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_invalid(&self) {
        self.invalid_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reclaimed(&self, requeued: usize, dead_lettered: usize) {
        self.items_requeued.fetch_add(requeued as u64, Ordering::Relaxed);
        self.items_dead_lettered.fetch_add(dead_lettered as u64, Ordering::Relaxed);
    }

    /// Collect current snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            pushed: self.items_pushed.load(Ordering::Relaxed),
            claimed: self.items_claimed.load(Ordering::Relaxed),
            acked: self.items_acked.load(Ordering::Relaxed),
            failed: self.items_failed.load(Ordering::Relaxed),
            requeued: self.items_requeued.load(Ordering::Relaxed),
            dead_lettered: self.items_dead_lettered.load(Ordering::Relaxed),
            invalid: self.invalid_records.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub pushed: u64,
    pub claimed: u64,
    pub acked: u64,
    pub failed: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub invalid: u64,
}

impl MetricsSnapshot {
    /// Claims made by this engine that have not been settled by it
    pub fn claims_outstanding(&self) -> u64 {
        self.claimed.saturating_sub(self.acked + self.failed)
    }

    /// Acked share of settled claims, as a percentage
    pub fn success_rate(&self) -> f64 {
        let settled = self.acked + self.failed;
        if settled == 0 {
            100.0
        } else {
            (self.acked as f64 / settled as f64) * 100.0
        }
    }
}

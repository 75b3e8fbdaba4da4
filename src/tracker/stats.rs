//! Process-wide tracking counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::TrackingStats;

/// Lock-free counters shared by the scheduler, update tasks and queries.
/// Everything except `contests_tracked` only ever increases.
#[derive(Debug, Default)]
pub struct TrackingMetrics {
    contests_tracked: AtomicU64,
    snapshots_created: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    error_count: AtomicU64,
    updates_timed: AtomicU64,
    total_update_micros: AtomicU64,
}

impl TrackingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_contests_tracked(&self) {
        self.contests_tracked.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec_contests_tracked(&self) {
        let _ = self
            .contests_tracked
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_snapshot(&self) {
        self.snapshots_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_update_micros.fetch_add(micros, Ordering::Relaxed);
        self.updates_timed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrackingStats {
        let timed = self.updates_timed.load(Ordering::Relaxed);
        let total_micros = self.total_update_micros.load(Ordering::Relaxed);
        let avg_update_latency_ms = if timed > 0 {
            total_micros as f64 / timed as f64 / 1_000.0
        } else {
            0.0
        };

        TrackingStats {
            contests_tracked: self.contests_tracked.load(Ordering::Relaxed),
            snapshots_created: self.snapshots_created.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            avg_update_latency_ms,
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

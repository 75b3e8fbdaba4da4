//! Ownership tracker orchestrator.
//!
//! Owns the contest registry, drives the periodic update schedule and
//! serves ownership queries. One scheduling loop ticks at a fixed
//! interval; on each tick every contest that is due, not locked and not
//! already updating gets its own task. Tasks run concurrently up to the
//! configured pool size, and a failure or panic in one never reaches the
//! scheduler or any other contest.

pub mod registry;
pub mod state;
pub mod stats;
pub mod update;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{self, Cache};
use crate::clock::Clock;
use crate::config::{TrackerConfig, TrendConfig};
use crate::leverage::LeverageCalculator;
use crate::sources::OwnershipSource;
use crate::stacks::StackPolicy;
use crate::storage::SnapshotStore;
use crate::trends::{self, TrendAnalyzer};
use crate::types::{
    ContestId, ContestSummary, OwnershipSnapshot, PlayerId, TrackerError, TrackerResult,
    TrackingStats, TrendMetrics,
};

use registry::ContestRegistry;
use state::{ContestHandle, ContestTrackerState, InFlightGuard};
use stats::TrackingMetrics;
use update::{with_timeout, UpdateContext};

/// External collaborators the tracker is built from.
pub struct Collaborators {
    pub source: Arc<dyn OwnershipSource>,
    pub leverage: Arc<dyn LeverageCalculator>,
    pub stacks: Arc<dyn StackPolicy>,
    pub cache: Arc<dyn Cache>,
    pub store: Arc<dyn SnapshotStore>,
    pub clock: Arc<dyn Clock>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct OwnershipTracker {
    registry: Arc<ContestRegistry>,
    ctx: Arc<UpdateContext>,
    pool: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    shutting_down: Arc<AtomicBool>,
}

impl OwnershipTracker {
    pub fn new(config: TrackerConfig, trend_config: TrendConfig, deps: Collaborators) -> Self {
        let analyzer = Arc::new(TrendAnalyzer::new(trend_config, deps.clock.clone()));
        let pool = Arc::new(Semaphore::new(config.max_concurrent_updates.max(1)));

        let ctx = UpdateContext {
            config,
            source: deps.source,
            leverage: deps.leverage,
            stacks: deps.stacks,
            cache: deps.cache,
            store: deps.store,
            analyzer,
            clock: deps.clock,
            metrics: Arc::new(TrackingMetrics::new()),
        };

        Self {
            registry: Arc::new(ContestRegistry::new()),
            ctx: Arc::new(ctx),
            pool,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    fn timeout(&self) -> Duration {
        self.ctx.config.external_call_timeout()
    }

    // -- Lifecycle --------------------------------------------------------

    /// Start tracking a contest at the default cadence and kick off its
    /// first update immediately.
    pub async fn track_contest(&self, contest_id: &str, lock_time: DateTime<Utc>) -> TrackerResult<()> {
        let interval = self.ctx.config.default_update_interval();
        self.track_contest_with_interval(contest_id, lock_time, interval).await
    }

    pub async fn track_contest_with_interval(
        &self,
        contest_id: &str,
        lock_time: DateTime<Utc>,
        update_interval: Duration,
    ) -> TrackerResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(TrackerError::ShutDown);
        }

        let state = ContestTrackerState::new(
            contest_id,
            lock_time,
            update_interval,
            self.ctx.config.history_capacity,
        );
        let handle = Arc::new(ContestHandle::new(state));

        self.registry.insert(handle.clone()).await?;
        self.ctx.metrics.inc_contests_tracked();
        info!(
            contest_id,
            lock_time = %lock_time.to_rfc3339(),
            interval_secs = update_interval.as_secs(),
            "Tracking contest"
        );

        self.dispatch(handle, self.ctx.clock.now()).await;
        Ok(())
    }

    /// Stop scheduling a contest. Idempotent; an update already running
    /// for it is allowed to finish. Stored snapshots are kept.
    pub async fn stop_tracking_contest(&self, contest_id: &str) -> bool {
        let Some(handle) = self.registry.remove(contest_id).await else {
            debug!(contest_id, "Stop requested for untracked contest");
            return false;
        };

        handle.retire();
        handle.state.write().await.is_active = false;
        self.ctx.metrics.dec_contests_tracked();
        self.ctx.analyzer.remove_contest(contest_id).await;
        info!(contest_id, "Stopped tracking contest");
        true
    }

    // -- Scheduling -------------------------------------------------------

    /// Run the scheduler until `shutdown` flips to true (or its sender is
    /// dropped), then drain in-flight updates.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.ctx.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_secs = self.ctx.config.tick_interval_secs,
            pool = self.ctx.config.max_concurrent_updates,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let dispatched = self.tick().await;
                    if dispatched > 0 {
                        debug!(dispatched, "Updates dispatched");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// One scheduler pass: reap finished tasks, dispatch due contests,
    /// sweep expired trend samples. Returns how many updates started.
    pub async fn tick(&self) -> usize {
        {
            let mut tasks = self.tasks.lock().await;
            while tasks.try_join_next().is_some() {}
        }

        if self.shutting_down.load(Ordering::Acquire) {
            return 0;
        }

        let now = self.ctx.clock.now();
        let mut dispatched = 0;
        for handle in self.registry.handles().await {
            if self.dispatch(handle, now).await {
                dispatched += 1;
            }
        }

        self.ctx.analyzer.prune_expired().await;
        dispatched
    }

    /// Start an update for `handle` if it is due and not already running.
    async fn dispatch(&self, handle: Arc<ContestHandle>, now: DateTime<Utc>) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }

        let Some(guard) = InFlightGuard::acquire(&handle) else {
            trace!(contest_id = %handle.contest_id, "Update already in flight");
            return false;
        };

        {
            let mut state = handle.state.write().await;
            if state.deactivate_if_locked(now) {
                info!(contest_id = %handle.contest_id, "Contest locked; no further updates");
            }
            if !state.is_due(now) {
                return false;
            }
            state.last_attempt = Some(now);
        }

        let task = Self::update_task(self.ctx.clone(), self.pool.clone(), handle, guard);
        self.tasks.lock().await.spawn(task);
        true
    }

    async fn update_task(
        ctx: Arc<UpdateContext>,
        pool: Arc<Semaphore>,
        handle: Arc<ContestHandle>,
        guard: InFlightGuard,
    ) {
        let _guard = guard;
        let Ok(_permit) = pool.acquire_owned().await else {
            return;
        };

        let contest_id = handle.contest_id.clone();
        let result = AssertUnwindSafe(update::run_update(&ctx, &handle))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                ctx.metrics.record_error();
                let source = ctx.source.name();
                warn!(
                    contest_id = %contest_id,
                    source,
                    error = %e,
                    "Ownership update failed"
                );
            }
            Err(panic) => {
                ctx.metrics.record_error();
                let source = ctx.source.name();
                error!(
                    contest_id = %contest_id,
                    source,
                    panic = %panic_message(panic.as_ref()),
                    "Ownership update panicked; recovered"
                );
            }
        }
    }

    /// Wait for every update dispatched so far to finish.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while tasks.join_next().await.is_some() {}
    }

    /// Stop dispatching, give in-flight updates the grace period to
    /// finish, then abort whatever is left.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let grace = self.ctx.config.shutdown_grace();
        info!(in_flight = tasks.len(), grace_secs = grace.as_secs(), "Draining updates");

        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Grace period elapsed; aborting remaining updates");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        self.pool.close();
        info!(stats = %self.get_tracking_stats(), "Tracker shut down");
    }

    // -- Queries ----------------------------------------------------------

    /// Latest snapshot: cache first, then in-memory state (repopulating
    /// the cache).
    pub async fn get_current_ownership(&self, contest_id: &str) -> TrackerResult<OwnershipSnapshot> {
        let key = cache::current_key(contest_id);
        match with_timeout("cache get", self.timeout(), self.ctx.cache.get(&key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<OwnershipSnapshot>(&bytes) {
                Ok(snapshot) => {
                    self.ctx.metrics.record_cache_hit();
                    return Ok(snapshot);
                }
                Err(e) => warn!(contest_id, error = %e, "Unreadable cached snapshot ignored"),
            },
            Ok(None) => {}
            Err(e) => warn!(contest_id, error = %e, "Cache read failed; using tracked state"),
        }
        self.ctx.metrics.record_cache_miss();

        let handle = self
            .registry
            .get(contest_id)
            .await
            .ok_or_else(|| TrackerError::NotTracked(contest_id.to_string()))?;

        let snapshot = handle
            .state
            .read()
            .await
            .latest()
            .cloned()
            .ok_or_else(|| TrackerError::InsufficientData {
                contest_id: contest_id.to_string(),
                player_id: None,
                have: 0,
                need: 1,
            })?;

        if let Err(e) = update::cache_snapshot(&self.ctx, &snapshot).await {
            warn!(contest_id, error = %e, "Cache repopulate failed");
        }
        Ok(snapshot)
    }

    /// Trends over the trailing `time_range`, largest |change| first, ties
    /// by player id. Rows carry lock-time predictions.
    pub async fn get_ownership_trends(
        &self,
        contest_id: &str,
        time_range: ChronoDuration,
    ) -> TrackerResult<Vec<TrendMetrics>> {
        let handle = self
            .registry
            .get(contest_id)
            .await
            .ok_or_else(|| TrackerError::NotTracked(contest_id.to_string()))?;

        let (lock_time, version) = {
            let state = handle.state.read().await;
            (
                state.lock_time,
                state.last_update.map_or(0, |t| t.timestamp_millis()),
            )
        };

        let key = cache::trends_key(contest_id, time_range.num_seconds(), version);
        if let Ok(Some(bytes)) = with_timeout("cache get", self.timeout(), self.ctx.cache.get(&key)).await {
            if let Ok(trends) = serde_json::from_slice::<Vec<TrendMetrics>>(&bytes) {
                self.ctx.metrics.record_cache_hit();
                return Ok(trends);
            }
        }
        self.ctx.metrics.record_cache_miss();

        let mut trends = self
            .ctx
            .analyzer
            .calculate_trends(contest_id, time_range, Some(lock_time))
            .await;
        trends::sort_by_change(&mut trends);

        let bytes = serde_json::to_vec(&trends)?;
        let ttl = self.ctx.config.trends_cache_ttl();
        if let Err(e) = with_timeout("cache set", self.timeout(), self.ctx.cache.set(&key, bytes, ttl)).await {
            warn!(contest_id, error = %e, "Trend cache write failed");
        }
        Ok(trends)
    }

    /// Lock-time forecast for one player of a tracked contest.
    pub async fn predict_ownership(&self, contest_id: &str, player_id: &str) -> TrackerResult<TrendMetrics> {
        let handle = self
            .registry
            .get(contest_id)
            .await
            .ok_or_else(|| TrackerError::NotTracked(contest_id.to_string()))?;
        let lock_time = handle.state.read().await.lock_time;
        self.ctx
            .analyzer
            .predict_ownership(contest_id, player_id, lock_time)
            .await
    }

    /// Leverage for the current ownership picture.
    pub async fn get_leverage_scores(&self, contest_id: &str) -> TrackerResult<HashMap<PlayerId, f64>> {
        let snapshot = self.get_current_ownership(contest_id).await?;
        Ok(self
            .ctx
            .leverage
            .calculate_leverage_scores(&snapshot.ownership, snapshot.total_entries))
    }

    /// Up to `limit` recent in-memory snapshots, oldest first.
    pub async fn get_ownership_history(
        &self,
        contest_id: &str,
        limit: usize,
    ) -> TrackerResult<Vec<OwnershipSnapshot>> {
        let handle = self
            .registry
            .get(contest_id)
            .await
            .ok_or_else(|| TrackerError::NotTracked(contest_id.to_string()))?;
        let history = handle.state.read().await.history(limit);
        Ok(history)
    }

    pub fn get_tracking_stats(&self) -> TrackingStats {
        self.ctx.metrics.snapshot()
    }

    /// Contests still being refreshed, ordered by id.
    pub async fn get_active_contests(&self) -> Vec<ContestSummary> {
        let mut active = Vec::new();
        for handle in self.registry.handles().await {
            let summary = handle.state.read().await.summary(handle.is_in_flight());
            if summary.is_active {
                active.push(summary);
            }
        }
        active
    }

    /// Contests with a live cached snapshot, tracked or not.
    pub async fn get_cached_contests(&self) -> TrackerResult<Vec<ContestId>> {
        let pattern = format!("{}*", cache::CURRENT_KEY_PREFIX);
        let keys = with_timeout("cache keys", self.timeout(), self.ctx.cache.keys(&pattern)).await?;
        Ok(keys
            .iter()
            .filter_map(|k| cache::contest_from_current_key(k))
            .collect())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! One update cycle for one contest.
//!
//! fetch → stacks → change velocity → leverage → in-memory apply →
//! durable append → cache write-through → trend samples.
//!
//! Only the fetch can abort a cycle. Persistence and cache failures are
//! logged and counted, and the in-memory state still moves forward so
//! live reads stay correct.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::state::ContestHandle;
use super::stats::TrackingMetrics;
use crate::cache::{self, Cache};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::leverage::LeverageCalculator;
use crate::sources::OwnershipSource;
use crate::stacks::StackPolicy;
use crate::storage::SnapshotStore;
use crate::trends::predict::hours_between;
use crate::trends::TrendAnalyzer;
use crate::types::{
    OwnershipMap, OwnershipSnapshot, PlayerId, TrackerError, TrackerResult,
};

/// Everything a cycle needs, shared by all update tasks.
pub(crate) struct UpdateContext {
    pub config: TrackerConfig,
    pub source: Arc<dyn OwnershipSource>,
    pub leverage: Arc<dyn LeverageCalculator>,
    pub stacks: Arc<dyn StackPolicy>,
    pub cache: Arc<dyn Cache>,
    pub store: Arc<dyn SnapshotStore>,
    pub analyzer: Arc<TrendAnalyzer>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<TrackingMetrics>,
}

/// What happened to the side effects of a completed cycle.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub snapshot: OwnershipSnapshot,
    pub persisted: bool,
    pub cached: bool,
}

/// Run `fut` under a deadline, mapping expiry to `TrackerError::Timeout`.
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> TrackerResult<T>
where
    F: Future<Output = TrackerResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TrackerError::Timeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Percentage points per hour for every player in `current`, against the
/// previous snapshot. New players and zero elapsed time give 0.
pub fn change_velocity(
    current: &OwnershipMap,
    now: DateTime<Utc>,
    previous: Option<&OwnershipSnapshot>,
) -> HashMap<PlayerId, f64> {
    let Some(prev) = previous else {
        return current.keys().map(|p| (p.clone(), 0.0)).collect();
    };
    let hours = hours_between(prev.timestamp, now);

    current
        .iter()
        .map(|(player, pct)| {
            let v = match prev.ownership.get(player) {
                Some(before) if hours > 0.0 => (pct - before) / hours,
                _ => 0.0,
            };
            (player.clone(), v)
        })
        .collect()
}

pub(crate) async fn cache_snapshot(ctx: &UpdateContext, snapshot: &OwnershipSnapshot) -> TrackerResult<()> {
    let bytes = serde_json::to_vec(snapshot)?;
    with_timeout(
        "cache set",
        ctx.config.external_call_timeout(),
        ctx.cache.set(
            &cache::current_key(&snapshot.contest_id),
            bytes,
            ctx.config.current_cache_ttl(),
        ),
    )
    .await
}

/// Run one full cycle. The caller holds the contest's in-flight guard.
pub(crate) async fn run_update(ctx: &UpdateContext, handle: &ContestHandle) -> TrackerResult<UpdateOutcome> {
    let started = Instant::now();
    let contest_id = &handle.contest_id;
    let timeout = ctx.config.external_call_timeout();

    let fetch = with_timeout(
        "ownership fetch",
        timeout,
        ctx.source.fetch_ownership(contest_id),
    )
    .await?;
    let now = ctx.clock.now();

    let stack_ownership = ctx.stacks.stack_ownership(&fetch.ownership);

    let (lock_time, velocity) = {
        let state = handle.state.read().await;
        (
            state.lock_time,
            change_velocity(&fetch.ownership, now, state.latest()),
        )
    };

    let leverage_scores = ctx
        .leverage
        .calculate_leverage_scores(&fetch.ownership, fetch.total_entries);

    let snapshot = OwnershipSnapshot {
        id: Uuid::new_v4(),
        contest_id: contest_id.clone(),
        timestamp: now,
        ownership: fetch.ownership,
        stack_ownership,
        total_entries: fetch.total_entries,
        time_to_lock_secs: (lock_time - now).num_seconds().max(0),
        change_velocity: velocity,
        leverage_scores,
    };

    handle.state.write().await.apply(snapshot.clone());
    ctx.metrics.record_snapshot();

    let persisted = match with_timeout("snapshot append", timeout, ctx.store.append(&snapshot)).await {
        Ok(()) => true,
        Err(e) => {
            ctx.metrics.record_error();
            warn!(contest_id = %contest_id, error = %e, "Snapshot not persisted; live state still updated");
            false
        }
    };

    let cached = match cache_snapshot(ctx, &snapshot).await {
        Ok(()) => true,
        Err(e) => {
            ctx.metrics.record_error();
            warn!(contest_id = %contest_id, error = %e, "Cache write-through failed");
            false
        }
    };

    if !handle.is_retired() {
        ctx.analyzer
            .update_trends(contest_id, &snapshot.ownership, now, snapshot.total_entries)
            .await;
    }

    let elapsed = started.elapsed();
    ctx.metrics.record_update_latency(elapsed);
    debug!(
        contest_id = %contest_id,
        players = snapshot.ownership.len(),
        stacks = snapshot.stack_ownership.len(),
        persisted,
        cached,
        latency_ms = elapsed.as_millis() as u64,
        "Ownership cycle complete"
    );

    Ok(UpdateOutcome {
        snapshot,
        persisted,
        cached,
    })
}

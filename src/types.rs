//! Shared types for the ownership tracker.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the trend, tracker, storage
//! and collaborator modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type ContestId = String;
pub type PlayerId = String;
pub type StackKey = String;

/// Player → ownership percentage (0–100).
pub type OwnershipMap = HashMap<PlayerId, f64>;

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// A single observed ownership sample for one player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OwnershipDataPoint {
    pub timestamp: DateTime<Utc>,
    /// Ownership percentage (0.0–100.0).
    pub ownership_percent: f64,
    pub total_entries: u64,
}

impl OwnershipDataPoint {
    pub fn new(timestamp: DateTime<Utc>, ownership_percent: f64, total_entries: u64) -> Self {
        Self {
            timestamp,
            ownership_percent: clamp_percent(ownership_percent),
            total_entries,
        }
    }
}

/// Clamp a percentage into [0, 100], mapping NaN to 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// Trend metrics
// ---------------------------------------------------------------------------

/// Direction of an ownership trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

impl TrendDirection {
    /// Classify a change with a symmetric deadband (strict inequality).
    pub fn classify(change: f64, deadband: f64) -> Self {
        if change > deadband {
            TrendDirection::Up
        } else if change < -deadband {
            TrendDirection::Down
        } else {
            TrendDirection::Stable
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "up"),
            TrendDirection::Down => write!(f, "down"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// Derived trend and lock-time prediction for one (contest, player) series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMetrics {
    pub contest_id: ContestId,
    pub player_id: PlayerId,
    pub current_ownership: f64,
    pub prev_ownership: f64,
    pub ownership_change: f64,
    /// Percentage points per hour.
    pub velocity: f64,
    /// Change in velocity between the last two intervals.
    pub acceleration: f64,
    pub direction: TrendDirection,
    /// 0.0–1.0
    pub strength: f64,
    /// 0.0–100.0
    pub predicted_ownership_at_lock: f64,
    /// 0.0–1.0
    pub confidence: f64,
    pub data_points: usize,
    pub computed_at: DateTime<Utc>,
}

impl fmt::Display for TrendMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {:.1}% ({:+.1}pp, {} {:.2}pp/h) → {:.1}% at lock (conf {:.0}%)",
            self.contest_id,
            self.player_id,
            self.current_ownership,
            self.ownership_change,
            self.direction,
            self.velocity,
            self.predicted_ownership_at_lock,
            self.confidence * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Full ownership picture for one contest at the end of one update cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipSnapshot {
    pub id: Uuid,
    pub contest_id: ContestId,
    pub timestamp: DateTime<Utc>,
    pub ownership: OwnershipMap,
    pub stack_ownership: HashMap<StackKey, f64>,
    pub total_entries: u64,
    /// Seconds until lock at snapshot time (never negative).
    pub time_to_lock_secs: i64,
    /// Percentage points per hour versus the previous snapshot.
    pub change_velocity: HashMap<PlayerId, f64>,
    pub leverage_scores: HashMap<PlayerId, f64>,
}

impl fmt::Display for OwnershipSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} players, {} stacks, {} entries, {}s to lock @ {}",
            self.contest_id,
            self.ownership.len(),
            self.stack_ownership.len(),
            self.total_entries,
            self.time_to_lock_secs,
            self.timestamp.to_rfc3339(),
        )
    }
}

// ---------------------------------------------------------------------------
// Stats and summaries
// ---------------------------------------------------------------------------

/// Point-in-time copy of the process-wide tracking counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingStats {
    pub contests_tracked: u64,
    pub snapshots_created: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_update_latency_ms: f64,
    pub error_count: u64,
}

impl fmt::Display for TrackingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contests: {} | snapshots: {} | cache: {}/{} hit/miss | avg latency: {:.1}ms | errors: {}",
            self.contests_tracked,
            self.snapshots_created,
            self.cache_hits,
            self.cache_misses,
            self.avg_update_latency_ms,
            self.error_count,
        )
    }
}

/// Read-only view of one tracked contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestSummary {
    pub contest_id: ContestId,
    pub lock_time: DateTime<Utc>,
    pub update_interval_secs: u64,
    pub is_active: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub snapshot_count: usize,
    pub player_count: usize,
    pub in_flight: bool,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the tracker and its collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("Contest not tracked: {0}")]
    NotTracked(ContestId),

    #[error("Contest already tracked: {0}")]
    AlreadyTracked(ContestId),

    #[error("Insufficient data for {contest_id}{}: have {have}, need {need}", player_suffix(.player_id))]
    InsufficientData {
        contest_id: ContestId,
        player_id: Option<PlayerId>,
        have: usize,
        need: usize,
    },

    #[error("Ownership fetch failed ({contest_id}): {message}")]
    SourceFetch { contest_id: ContestId, message: String },

    #[error("Snapshot persistence failed: {0}")]
    Persistence(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tracker is shut down")]
    ShutDown,
}

fn player_suffix(player_id: &Option<PlayerId>) -> String {
    player_id
        .as_ref()
        .map(|p| format!("/{p}"))
        .unwrap_or_default()
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Serialization(e.to_string())
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

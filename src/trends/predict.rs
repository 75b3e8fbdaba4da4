//! Trend and lock-time extrapolation math.
//!
//! Pure functions over a slice of samples; no locking, no clock. The
//! analyzer decides which samples are in play and what "now" is.

use chrono::{DateTime, Utc};

use crate::config::TrendConfig;
use crate::types::{clamp_percent, OwnershipDataPoint, TrendDirection, TrendMetrics};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Signed hours from `from` to `to`.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Rate of change between two samples in pp/hour; 0 when no time elapsed.
pub fn velocity_between(a: &OwnershipDataPoint, b: &OwnershipDataPoint) -> f64 {
    let hours = hours_between(a.timestamp, b.timestamp);
    if hours > 0.0 {
        (b.ownership_percent - a.ownership_percent) / hours
    } else {
        0.0
    }
}

/// Velocity of every consecutive pair, oldest first.
pub fn segment_velocities(points: &[OwnershipDataPoint]) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| velocity_between(&w[0], &w[1]))
        .collect()
}

/// Population variance; 0 for fewer than two values.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// exp(-var(velocities) / scale) × min(1, n / saturation), in [0, 1].
pub fn confidence(points: &[OwnershipDataPoint], config: &TrendConfig) -> f64 {
    let stability = (-variance(&segment_velocities(points)) / config.velocity_variance_scale).exp();
    let coverage = (points.len() as f64 / config.confidence_saturation_points).min(1.0);
    let c = stability * coverage;
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// min(1, |velocity| / scale).
pub fn strength(velocity: f64, config: &TrendConfig) -> f64 {
    let s = (velocity.abs() / config.strength_velocity_scale).min(1.0);
    if s.is_finite() {
        s
    } else {
        0.0
    }
}

/// Second-order extrapolation to lock from the tail of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrapolation {
    /// Between the last two samples.
    pub velocity: f64,
    /// Last velocity minus the one before it; 0 with fewer than 3 samples.
    pub acceleration: f64,
    /// Hours from the last sample to lock, never negative.
    pub time_to_lock_hours: f64,
    pub linear: f64,
    /// Second-order estimate clamped to [0, 100].
    pub predicted: f64,
}

/// Extrapolate to `lock_time`. Needs at least one point; callers enforce
/// the configured minimum before getting here.
pub fn extrapolate(points: &[OwnershipDataPoint], lock_time: DateTime<Utc>) -> Option<Extrapolation> {
    let last = points.last()?;
    let n = points.len();

    let velocity = if n >= 2 {
        velocity_between(&points[n - 2], last)
    } else {
        0.0
    };
    let acceleration = if n >= 3 {
        velocity - velocity_between(&points[n - 3], &points[n - 2])
    } else {
        0.0
    };

    // Past lock there is nothing left to extrapolate.
    let time_to_lock_hours = hours_between(last.timestamp, lock_time).max(0.0);

    let linear = last.ownership_percent + velocity * time_to_lock_hours;
    let adjusted = linear + 0.5 * acceleration * time_to_lock_hours * time_to_lock_hours;

    Some(Extrapolation {
        velocity,
        acceleration,
        time_to_lock_hours,
        linear,
        predicted: clamp_percent(adjusted),
    })
}

/// Range trend: first vs last sample of `points`, with an optional
/// lock-time prediction. `points` must be non-empty.
pub fn range_trend(
    contest_id: &str,
    player_id: &str,
    points: &[OwnershipDataPoint],
    lock_time: Option<DateTime<Utc>>,
    config: &TrendConfig,
    now: DateTime<Utc>,
) -> Option<TrendMetrics> {
    let first = points.first()?;
    let last = points.last()?;

    let change = last.ownership_percent - first.ownership_percent;
    let elapsed = hours_between(first.timestamp, last.timestamp);
    let velocity = if elapsed > 0.0 { change / elapsed } else { 0.0 };

    let tail = extrapolate(points, lock_time.unwrap_or(last.timestamp))?;
    let predicted = if lock_time.is_some() {
        tail.predicted
    } else {
        last.ownership_percent
    };

    Some(TrendMetrics {
        contest_id: contest_id.to_string(),
        player_id: player_id.to_string(),
        current_ownership: last.ownership_percent,
        prev_ownership: first.ownership_percent,
        ownership_change: change,
        velocity,
        acceleration: tail.acceleration,
        direction: TrendDirection::classify(change, config.direction_deadband),
        strength: strength(velocity, config),
        predicted_ownership_at_lock: predicted,
        confidence: confidence(points, config),
        data_points: points.len(),
        computed_at: now,
    })
}

/// Lock-time prediction: velocity and acceleration come from the tail of
/// the series rather than the whole range. `points` must be non-empty.
pub fn lock_prediction(
    contest_id: &str,
    player_id: &str,
    points: &[OwnershipDataPoint],
    lock_time: DateTime<Utc>,
    config: &TrendConfig,
    now: DateTime<Utc>,
) -> Option<TrendMetrics> {
    let first = points.first()?;
    let last = points.last()?;
    let x = extrapolate(points, lock_time)?;
    let change = last.ownership_percent - first.ownership_percent;

    Some(TrendMetrics {
        contest_id: contest_id.to_string(),
        player_id: player_id.to_string(),
        current_ownership: last.ownership_percent,
        prev_ownership: first.ownership_percent,
        ownership_change: change,
        velocity: x.velocity,
        acceleration: x.acceleration,
        direction: TrendDirection::classify(change, config.direction_deadband),
        strength: strength(x.velocity, config),
        predicted_ownership_at_lock: x.predicted,
        confidence: confidence(points, config),
        data_points: points.len(),
        computed_at: now,
    })
}

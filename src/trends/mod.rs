//! Ownership trend analysis.
//!
//! Keeps a bounded series per (contest, player), derives range trends,
//! and extrapolates ownership to lock time. All time comparisons go
//! through the injected `Clock`, so with a fixed clock every result is a
//! pure function of the stored samples.

pub mod predict;
pub mod series;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::TrendConfig;
use crate::types::{
    ContestId, OwnershipDataPoint, OwnershipMap, PlayerId, TrackerError, TrackerResult,
    TrendMetrics,
};

pub use series::{SeriesState, TrendSeries};

type SeriesKey = (ContestId, PlayerId);
type PredictionKey = (ContestId, PlayerId, DateTime<Utc>);

/// Order trend rows by |change| descending, then player id ascending.
pub fn sort_by_change(trends: &mut [TrendMetrics]) {
    trends.sort_by(|a, b| {
        b.ownership_change
            .abs()
            .total_cmp(&a.ownership_change.abs())
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
}

pub struct TrendAnalyzer {
    config: TrendConfig,
    clock: Arc<dyn Clock>,
    series: RwLock<HashMap<SeriesKey, TrendSeries>>,
    predictions: RwLock<HashMap<PredictionKey, TrendMetrics>>,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            series: RwLock::new(HashMap::new()),
            predictions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.trend_window()
    }

    /// Record one sample per player and prune each touched series.
    /// Returns the number of samples accepted.
    pub async fn update_trends(
        &self,
        contest_id: &str,
        ownership: &OwnershipMap,
        timestamp: DateTime<Utc>,
        total_entries: u64,
    ) -> usize {
        let cutoff = self.cutoff(self.clock.now());
        let max_points = self.config.max_data_points;
        let mut accepted = 0;

        {
            let mut series = self.series.write().await;
            let mut emptied: Vec<SeriesKey> = Vec::new();
            for (player_id, pct) in ownership {
                let key = (contest_id.to_string(), player_id.clone());
                let entry = series.entry(key.clone()).or_default();
                let point = OwnershipDataPoint::new(timestamp, *pct, total_entries);
                if entry.push(point, max_points, cutoff) {
                    accepted += 1;
                } else {
                    debug!(contest_id, player_id = %player_id, "Out-of-order sample dropped");
                }
                if entry.is_empty() {
                    emptied.push(key);
                }
            }
            for key in &emptied {
                series.remove(key);
            }
        }

        if accepted > 0 {
            self.invalidate_predictions(contest_id).await;
        }
        trace!(contest_id, accepted, "Trend samples recorded");
        accepted
    }

    /// Trends for every player with enough samples inside `time_range`.
    /// With a lock time, rows also carry a lock-time prediction.
    /// Rows come back ordered by player id.
    pub async fn calculate_trends(
        &self,
        contest_id: &str,
        time_range: Duration,
        lock_time: Option<DateTime<Utc>>,
    ) -> Vec<TrendMetrics> {
        let now = self.clock.now();
        let since = (now - time_range).max(self.cutoff(now));

        let series = self.series.read().await;
        let mut trends: Vec<TrendMetrics> = series
            .iter()
            .filter(|((contest, _), _)| contest == contest_id)
            .filter_map(|((_, player_id), s)| {
                let points = s.since(since);
                if points.len() < self.config.min_data_points {
                    return None;
                }
                predict::range_trend(contest_id, player_id, &points, lock_time, &self.config, now)
            })
            .collect();

        trends.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        trends
    }

    /// Lock-time ownership forecast for one player. Results are cached per
    /// (contest, player, lock time) until the TTL lapses or a new sample
    /// for the contest arrives.
    pub async fn predict_ownership(
        &self,
        contest_id: &str,
        player_id: &str,
        lock_time: DateTime<Utc>,
    ) -> TrackerResult<TrendMetrics> {
        let now = self.clock.now();
        let key = (contest_id.to_string(), player_id.to_string(), lock_time);
        let ttl = self.config.prediction_cache_ttl();

        if let Some(cached) = self.predictions.read().await.get(&key) {
            let age = now - cached.computed_at;
            if age >= Duration::zero() && age < ttl {
                return Ok(cached.clone());
            }
        }

        let points = {
            let series = self.series.read().await;
            series
                .get(&(key.0.clone(), key.1.clone()))
                .map(|s| s.since(self.cutoff(now)))
                .unwrap_or_default()
        };

        if points.len() < self.config.min_data_points {
            return Err(TrackerError::InsufficientData {
                contest_id: contest_id.to_string(),
                player_id: Some(player_id.to_string()),
                have: points.len(),
                need: self.config.min_data_points,
            });
        }

        let metrics =
            predict::lock_prediction(contest_id, player_id, &points, lock_time, &self.config, now)
                .ok_or_else(|| TrackerError::InsufficientData {
                    contest_id: contest_id.to_string(),
                    player_id: Some(player_id.to_string()),
                    have: 0,
                    need: self.config.min_data_points,
                })?;

        self.predictions.write().await.insert(key, metrics.clone());
        Ok(metrics)
    }

    /// Where a series sits in Empty → Insufficient → Trending, as of now.
    pub async fn series_state(&self, contest_id: &str, player_id: &str) -> SeriesState {
        let cutoff = self.cutoff(self.clock.now());
        self.series
            .read()
            .await
            .get(&(contest_id.to_string(), player_id.to_string()))
            .map_or(SeriesState::Empty, |s| {
                s.state(self.config.min_data_points, cutoff)
            })
    }

    /// Number of samples currently held for a series.
    pub async fn series_len(&self, contest_id: &str, player_id: &str) -> usize {
        self.series
            .read()
            .await
            .get(&(contest_id.to_string(), player_id.to_string()))
            .map_or(0, TrendSeries::len)
    }

    /// Apply the age cutoff to every series, dropping ones left empty.
    /// Returns the number of samples removed.
    pub async fn prune_expired(&self) -> usize {
        let cutoff = self.cutoff(self.clock.now());
        let max_points = self.config.max_data_points;
        let mut touched: Vec<SeriesKey> = Vec::new();
        let mut removed = 0;

        {
            let mut series = self.series.write().await;
            for (key, s) in series.iter_mut() {
                let n = s.prune(max_points, cutoff);
                if n > 0 {
                    removed += n;
                    touched.push(key.clone());
                }
            }
            series.retain(|_, s| !s.is_empty());
        }

        if !touched.is_empty() {
            let mut predictions = self.predictions.write().await;
            predictions.retain(|(c, p, _), _| !touched.iter().any(|(tc, tp)| tc == c && tp == p));
            debug!(removed, series = touched.len(), "Expired trend samples pruned");
        }
        removed
    }

    /// Forget everything held for a contest.
    pub async fn remove_contest(&self, contest_id: &str) {
        self.series
            .write()
            .await
            .retain(|(contest, _), _| contest != contest_id);
        self.invalidate_predictions(contest_id).await;
    }

    /// Number of live series across all contests.
    pub async fn series_count(&self) -> usize {
        self.series.read().await.len()
    }

    async fn invalidate_predictions(&self, contest_id: &str) {
        self.predictions
            .write()
            .await
            .retain(|(contest, _, _), _| contest != contest_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

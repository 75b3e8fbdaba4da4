//! Bounded ownership time series for one (contest, player).

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::types::OwnershipDataPoint;

/// Where a series sits relative to the minimum sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    Empty,
    Insufficient,
    Trending,
}

/// Time-ordered samples. Timestamps never decrease, length never exceeds
/// the cap passed to `push`/`prune`, and nothing older than the cutoff
/// survives a mutation.
#[derive(Debug, Clone, Default)]
pub struct TrendSeries {
    points: VecDeque<OwnershipDataPoint>,
}

impl TrendSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, then prune. Returns false (and only prunes) if the
    /// sample is older than the newest point already held.
    pub fn push(&mut self, point: OwnershipDataPoint, max_points: usize, cutoff: DateTime<Utc>) -> bool {
        let in_order = self
            .points
            .back()
            .map_or(true, |last| point.timestamp >= last.timestamp);
        if in_order {
            self.points.push_back(point);
        }
        self.prune(max_points, cutoff);
        in_order
    }

    /// Apply the count cap and the age cutoff. Returns how many points went.
    pub fn prune(&mut self, max_points: usize, cutoff: DateTime<Utc>) -> usize {
        let before = self.points.len();
        while self.points.len() > max_points {
            self.points.pop_front();
        }
        while self.points.front().is_some_and(|p| p.timestamp < cutoff) {
            self.points.pop_front();
        }
        before - self.points.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&OwnershipDataPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OwnershipDataPoint> {
        self.points.iter()
    }

    /// Points at or after `since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<OwnershipDataPoint> {
        self.points
            .iter()
            .filter(|p| p.timestamp >= since)
            .copied()
            .collect()
    }

    /// State as seen from `cutoff` (points older than it do not count).
    pub fn state(&self, min_points: usize, cutoff: DateTime<Utc>) -> SeriesState {
        match self.points.iter().filter(|p| p.timestamp >= cutoff).count() {
            0 => SeriesState::Empty,
            n if n < min_points => SeriesState::Insufficient,
            _ => SeriesState::Trending,
        }
    }
}

//! Per-contest tracking state.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::types::{ContestId, ContestSummary, OwnershipMap, OwnershipSnapshot, PlayerId, StackKey};

/// Mutable view of one contest: the latest ownership picture plus a
/// bounded ring of recent snapshots.
#[derive(Debug, Clone)]
pub struct ContestTrackerState {
    pub contest_id: ContestId,
    pub lock_time: DateTime<Utc>,
    pub update_interval: Duration,
    pub is_active: bool,
    pub current_ownership: OwnershipMap,
    pub stack_ownership: HashMap<StackKey, f64>,
    pub total_entries: u64,
    pub change_velocity: HashMap<PlayerId, f64>,
    pub leverage_scores: HashMap<PlayerId, f64>,
    /// Last successful cycle.
    pub last_update: Option<DateTime<Utc>>,
    /// Last time a cycle was dispatched, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    history: VecDeque<OwnershipSnapshot>,
    history_capacity: usize,
}

impl ContestTrackerState {
    pub fn new(
        contest_id: &str,
        lock_time: DateTime<Utc>,
        update_interval: Duration,
        history_capacity: usize,
    ) -> Self {
        Self {
            contest_id: contest_id.to_string(),
            lock_time,
            update_interval,
            is_active: true,
            current_ownership: OwnershipMap::new(),
            stack_ownership: HashMap::new(),
            total_entries: 0,
            change_velocity: HashMap::new(),
            leverage_scores: HashMap::new(),
            last_update: None,
            last_attempt: None,
            history: VecDeque::with_capacity(history_capacity.min(128)),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Whether a new cycle should start at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active || now >= self.lock_time {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .map_or(false, |elapsed| elapsed >= self.update_interval),
        }
    }

    /// Mark inactive once lock has passed. Returns true on the transition.
    pub fn deactivate_if_locked(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_active && now >= self.lock_time {
            self.is_active = false;
            return true;
        }
        false
    }

    /// Install a completed snapshot as the current picture.
    pub fn apply(&mut self, snapshot: OwnershipSnapshot) {
        self.current_ownership = snapshot.ownership.clone();
        self.stack_ownership = snapshot.stack_ownership.clone();
        self.total_entries = snapshot.total_entries;
        self.change_velocity = snapshot.change_velocity.clone();
        self.leverage_scores = snapshot.leverage_scores.clone();
        self.last_update = Some(snapshot.timestamp);

        self.history.push_back(snapshot);
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&OwnershipSnapshot> {
        self.history.back()
    }

    /// Up to `limit` most recent snapshots, oldest first.
    pub fn history(&self, limit: usize) -> Vec<OwnershipSnapshot> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn summary(&self, in_flight: bool) -> ContestSummary {
        ContestSummary {
            contest_id: self.contest_id.clone(),
            lock_time: self.lock_time,
            update_interval_secs: self.update_interval.as_secs(),
            is_active: self.is_active,
            last_update: self.last_update,
            snapshot_count: self.history.len(),
            player_count: self.current_ownership.len(),
            in_flight,
        }
    }
}

/// Registry entry: contest state behind its own lock, plus the flags the
/// scheduler reads without touching that lock.
#[derive(Debug)]
pub struct ContestHandle {
    pub contest_id: ContestId,
    pub state: RwLock<ContestTrackerState>,
    in_flight: AtomicBool,
    retired: AtomicBool,
}

impl ContestHandle {
    pub fn new(state: ContestTrackerState) -> Self {
        Self {
            contest_id: state.contest_id.clone(),
            state: RwLock::new(state),
            in_flight: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Set once the contest leaves the registry.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

/// Exclusive right to run one update cycle for a contest. Released on
/// drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    handle: Arc<ContestHandle>,
}

impl InFlightGuard {
    /// None if a cycle for this contest is already running.
    pub fn acquire(handle: &Arc<ContestHandle>) -> Option<Self> {
        handle
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                handle: Arc::clone(handle),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.handle.in_flight.store(false, Ordering::Release);
    }
}

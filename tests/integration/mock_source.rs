//! Deterministic collaborators for integration testing.
//!
//! `MockSource` serves scripted ownership per contest and can be told to
//! fail, panic or stall for individual contests. It also records the
//! peak number of fetches running at once. `FailingStore` and
//! `FailingCache` reject every call so degraded paths can be exercised.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use ownership_tracker::cache::memory::MemoryCache;
use ownership_tracker::cache::Cache;
use ownership_tracker::clock::ManualClock;
use ownership_tracker::config::{TrackerConfig, TrendConfig};
use ownership_tracker::leverage::{InverseOwnershipLeverage, LeverageCalculator};
use ownership_tracker::sources::{OwnershipFetch, OwnershipSource};
use ownership_tracker::stacks::{NoStacks, StackPolicy};
use ownership_tracker::storage::{MemorySnapshotStore, SnapshotStore};
use ownership_tracker::tracker::{Collaborators, OwnershipTracker};
use ownership_tracker::types::*;

/// A scripted ownership source.
///
/// Each contest has a queue of responses; the last one repeats once the
/// queue is down to a single entry.
#[derive(Default)]
pub struct MockSource {
    scripts: Mutex<HashMap<ContestId, Vec<OwnershipFetch>>>,
    failing: Mutex<HashSet<ContestId>>,
    panicking: Mutex<HashSet<ContestId>>,
    calls: Mutex<HashMap<ContestId, usize>>,
    delays: Mutex<HashMap<ContestId, Duration>>,
    default_delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for a contest, served in order.
    pub fn script(&self, contest_id: &str, steps: Vec<Vec<(&str, f64)>>, total_entries: u64) {
        let fetches = steps
            .into_iter()
            .map(|players| OwnershipFetch {
                ownership: players.into_iter().map(|(p, v)| (p.to_string(), v)).collect(),
                total_entries,
            })
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(contest_id.to_string(), fetches);
    }

    /// Every fetch for this contest returns an error.
    pub fn fail(&self, contest_id: &str) {
        self.failing.lock().unwrap().insert(contest_id.to_string());
    }

    /// Every fetch for this contest panics.
    pub fn panic_on(&self, contest_id: &str) {
        self.panicking.lock().unwrap().insert(contest_id.to_string());
    }

    /// Every fetch for this contest sleeps for `delay` before answering.
    pub fn delay(&self, contest_id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(contest_id.to_string(), delay);
    }

    /// Delay for contests without their own.
    pub fn delay_all(&self, delay: Duration) {
        *self.default_delay.lock().unwrap() = Some(delay);
    }

    /// Most fetches observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self, contest_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(contest_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl OwnershipSource for MockSource {
    async fn fetch_ownership(&self, contest_id: &ContestId) -> TrackerResult<OwnershipFetch> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(contest_id.clone())
            .or_insert(0) += 1;

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(contest_id)
            .copied()
            .or(*self.default_delay.lock().unwrap());
        if let Some(delay) = delay {
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            let _running = ActiveFetch(&self.active);
            tokio::time::sleep(delay).await;
        }

        if self.panicking.lock().unwrap().contains(contest_id) {
            panic!("scripted panic for {contest_id}");
        }
        if self.failing.lock().unwrap().contains(contest_id) {
            return Err(TrackerError::SourceFetch {
                contest_id: contest_id.clone(),
                message: "scripted failure".into(),
            });
        }

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(contest_id)
            .ok_or_else(|| TrackerError::SourceFetch {
                contest_id: contest_id.clone(),
                message: "no script".into(),
            })?;
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            queue.first().cloned().ok_or_else(|| TrackerError::SourceFetch {
                contest_id: contest_id.clone(),
                message: "empty script".into(),
            })
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Decrements the running-fetch count when dropped, also on abort.
struct ActiveFetch<'a>(&'a AtomicUsize);

impl Drop for ActiveFetch<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot store whose every append fails.
pub struct FailingStore;

#[async_trait]
impl SnapshotStore for FailingStore {
    async fn append(&self, _snapshot: &OwnershipSnapshot) -> TrackerResult<()> {
        Err(TrackerError::Persistence("disk full".into()))
    }
}

/// Cache whose every call fails.
pub struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> TrackerResult<Option<Vec<u8>>> {
        Err(TrackerError::Cache("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> TrackerResult<()> {
        Err(TrackerError::Cache("connection refused".into()))
    }

    async fn keys(&self, _pattern: &str) -> TrackerResult<Vec<String>> {
        Err(TrackerError::Cache("connection refused".into()))
    }
}

/// A tracker plus handles on its collaborators.
pub struct Harness {
    pub tracker: OwnershipTracker,
    pub clock: Arc<ManualClock>,
    pub source: Arc<MockSource>,
    pub store: Arc<MemorySnapshotStore>,
    pub cache: Arc<MemoryCache>,
}

pub struct HarnessBuilder {
    tracker_config: TrackerConfig,
    trend_config: TrendConfig,
    failing_store: bool,
    failing_cache: bool,
    leverage: Option<Arc<dyn LeverageCalculator>>,
    stacks: Option<Arc<dyn StackPolicy>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            tracker_config: TrackerConfig::default(),
            trend_config: TrendConfig::default(),
            failing_store: false,
            failing_cache: false,
            leverage: None,
            stacks: None,
        }
    }

    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    pub fn failing_store(mut self) -> Self {
        self.failing_store = true;
        self
    }

    pub fn failing_cache(mut self) -> Self {
        self.failing_cache = true;
        self
    }

    pub fn leverage(mut self, leverage: Arc<dyn LeverageCalculator>) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn stacks(mut self, stacks: Arc<dyn StackPolicy>) -> Self {
        self.stacks = Some(stacks);
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = Arc::new(MemoryCache::new(clock.clone()));

        let store_dep: Arc<dyn SnapshotStore> = if self.failing_store {
            Arc::new(FailingStore)
        } else {
            store.clone()
        };
        let cache_dep: Arc<dyn Cache> = if self.failing_cache {
            Arc::new(FailingCache)
        } else {
            cache.clone()
        };

        let tracker = OwnershipTracker::new(
            self.tracker_config,
            self.trend_config,
            Collaborators {
                source: source.clone(),
                leverage: self
                    .leverage
                    .unwrap_or_else(|| Arc::new(InverseOwnershipLeverage::default()) as Arc<dyn LeverageCalculator>),
                stacks: self
                    .stacks
                    .unwrap_or_else(|| Arc::new(NoStacks) as Arc<dyn StackPolicy>),
                cache: cache_dep,
                store: store_dep,
                clock: clock.clone(),
            },
        );

        Harness {
            tracker,
            clock,
            source,
            store,
            cache,
        }
    }
}

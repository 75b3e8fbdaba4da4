//! End-to-end tracker behaviour against scripted collaborators.
//!
//! Time is driven by a `ManualClock`; each scheduler pass is a direct
//! `tick()` followed by `settle()` so every assertion sees a quiescent
//! tracker.

use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use ownership_tracker::clock::Clock;
use ownership_tracker::config::{StackDefinition, TrackerConfig};
use ownership_tracker::leverage::LeverageCalculator;
use ownership_tracker::stacks::DefinedStacks;
use ownership_tracker::types::*;

use crate::mock_source::{Harness, HarnessBuilder};

fn harness() -> Harness {
    HarnessBuilder::new().build()
}

/// Advance past the default update interval and run one scheduler pass.
async fn next_cycle(h: &Harness) -> usize {
    h.clock.advance(ChronoDuration::seconds(30));
    let dispatched = h.tracker.tick().await;
    h.tracker.settle().await;
    dispatched
}

fn lock_in(h: &Harness, hours: i64) -> chrono::DateTime<chrono::Utc> {
    h.clock.now() + ChronoDuration::hours(hours)
}

// -- Lifecycle ---------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_track_calls_all_register() {
    let h = harness();
    let lock = lock_in(&h, 2);

    let mut tasks = Vec::new();
    for i in 0..100 {
        let tracker = h.tracker.clone();
        tasks.push(tokio::spawn(async move {
            tracker.track_contest(&format!("contest-{i:03}"), lock).await
        }));
    }
    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }
    h.tracker.settle().await;

    assert_eq!(h.tracker.get_tracking_stats().contests_tracked, 100);
    let active = h.tracker.get_active_contests().await;
    assert_eq!(active.len(), 100);
    assert_eq!(active[0].contest_id, "contest-000");
    assert_eq!(active[99].contest_id, "contest-099");
}

#[tokio::test]
async fn test_stop_tracking_is_idempotent() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    assert!(h.tracker.stop_tracking_contest("c1").await);
    assert!(!h.tracker.stop_tracking_contest("c1").await);
    assert_eq!(h.tracker.get_tracking_stats().contests_tracked, 0);
    assert!(h.tracker.get_active_contests().await.is_empty());

    // Stopped contests are no longer scheduled.
    assert_eq!(next_cycle(&h).await, 0);
    assert_eq!(h.source.calls("c1"), 1);

    // Stored snapshots survive the stop.
    assert_eq!(h.store.snapshots_for("c1").await.len(), 1);
}

#[tokio::test]
async fn test_retracking_after_stop() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;
    h.tracker.stop_tracking_contest("c1").await;

    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;
    assert_eq!(h.tracker.get_tracking_stats().contests_tracked, 1);
    assert_eq!(h.source.calls("c1"), 2);
}

#[tokio::test]
async fn test_locked_contest_stops_refreshing() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker
        .track_contest("c1", h.clock.now() + ChronoDuration::seconds(45))
        .await
        .unwrap();
    h.tracker.settle().await;

    assert_eq!(next_cycle(&h).await, 1);
    assert_eq!(next_cycle(&h).await, 0);
    assert_eq!(h.source.calls("c1"), 2);
    assert!(h.tracker.get_active_contests().await.is_empty());

    let history = h.tracker.get_ownership_history("c1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].time_to_lock_secs, 15);
}

// -- Update cycle ------------------------------------------------------------

#[tokio::test]
async fn test_snapshot_contents_after_two_cycles() {
    let h = harness();
    h.source.script(
        "c1",
        vec![vec![("a", 10.0), ("b", 40.0)], vec![("a", 12.0), ("b", 40.0)]],
        5_000,
    );
    h.tracker.track_contest("c1", lock_in(&h, 2)).await.unwrap();
    h.tracker.settle().await;
    next_cycle(&h).await;

    let snap = h.tracker.get_current_ownership("c1").await.unwrap();
    assert_eq!(snap.contest_id, "c1");
    assert_eq!(snap.total_entries, 5_000);
    assert_eq!(snap.ownership["a"], 12.0);
    // 2 points over 30 seconds is 240 points per hour.
    assert!((snap.change_velocity["a"] - 240.0).abs() < 1e-9);
    assert_eq!(snap.change_velocity["b"], 0.0);
    assert!(snap.leverage_scores["a"] > snap.leverage_scores["b"]);
    assert_eq!(snap.time_to_lock_secs, 2 * 3600 - 30);

    let stats = h.tracker.get_tracking_stats();
    assert_eq!(stats.snapshots_created, 2);
    assert_eq!(stats.error_count, 0);
    assert_eq!(h.store.snapshots_for("c1").await.len(), 2);
}

#[tokio::test]
async fn test_interval_gates_dispatch() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker
        .track_contest_with_interval("c1", lock_in(&h, 1), std::time::Duration::from_secs(90))
        .await
        .unwrap();
    h.tracker.settle().await;

    assert_eq!(next_cycle(&h).await, 0);
    assert_eq!(next_cycle(&h).await, 0);
    assert_eq!(next_cycle(&h).await, 1);
    assert_eq!(h.source.calls("c1"), 2);

    let summary = &h.tracker.get_active_contests().await[0];
    assert_eq!(summary.update_interval_secs, 90);
    assert_eq!(summary.snapshot_count, 2);
    assert!(!summary.in_flight);
}

#[tokio::test]
async fn test_stacks_flow_into_snapshots() {
    let stacks = DefinedStacks::new(vec![StackDefinition {
        key: "qb+wr".into(),
        players: vec!["qb".into(), "wr".into()],
    }]);
    let h = HarnessBuilder::new().stacks(Arc::new(stacks)).build();
    h.source
        .script("c1", vec![vec![("qb", 20.0), ("wr", 50.0)]], 1_000);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let snap = h.tracker.get_current_ownership("c1").await.unwrap();
    assert!((snap.stack_ownership["qb+wr"] - 10.0).abs() < 1e-9);
}

// -- Failure isolation -------------------------------------------------------

#[tokio::test]
async fn test_persistence_failure_still_serves_values() {
    let h = HarnessBuilder::new().failing_store().build();
    h.source.script("c1", vec![vec![("a", 33.0)]], 900);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let snap = h.tracker.get_current_ownership("c1").await.unwrap();
    assert_eq!(snap.ownership["a"], 33.0);

    let stats = h.tracker.get_tracking_stats();
    assert_eq!(stats.snapshots_created, 1);
    assert_eq!(stats.error_count, 1);
}

#[tokio::test]
async fn test_source_failure_leaves_state_untouched() {
    let h = harness();
    h.source.fail("c1");
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let err = h.tracker.get_current_ownership("c1").await.unwrap_err();
    assert!(matches!(err, TrackerError::InsufficientData { have: 0, .. }));
    assert_eq!(h.tracker.get_tracking_stats().error_count, 1);
    assert_eq!(h.tracker.get_tracking_stats().snapshots_created, 0);

    // Retried on the next due tick, not before.
    assert_eq!(h.tracker.tick().await, 0);
    assert_eq!(next_cycle(&h).await, 1);
    assert_eq!(h.source.calls("c1"), 2);
}

#[tokio::test]
async fn test_panicking_contest_does_not_affect_others() {
    let h = harness();
    h.source.panic_on("bad");
    h.source.script("good", vec![vec![("a", 5.0)]], 100);

    h.tracker.track_contest("bad", lock_in(&h, 1)).await.unwrap();
    h.tracker.track_contest("good", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let snap = h.tracker.get_current_ownership("good").await.unwrap();
    assert_eq!(snap.ownership["a"], 5.0);
    assert_eq!(h.tracker.get_tracking_stats().error_count, 1);

    // The panicking contest keeps its schedule.
    assert_eq!(next_cycle(&h).await, 2);
    assert_eq!(h.source.calls("bad"), 2);
    assert_eq!(h.tracker.get_tracking_stats().error_count, 2);
}

#[tokio::test]
async fn test_slow_fetch_times_out_without_blocking_others() {
    let config = TrackerConfig {
        external_call_timeout_ms: 100,
        ..TrackerConfig::default()
    };
    let h = HarnessBuilder::new().tracker_config(config).build();
    h.source.script("slow", vec![vec![("a", 1.0)]], 100);
    h.source.delay("slow", Duration::from_secs(5));
    h.source.script("fast", vec![vec![("b", 7.0)]], 100);

    let started = Instant::now();
    h.tracker.track_contest("slow", lock_in(&h, 1)).await.unwrap();
    h.tracker.track_contest("fast", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;
    assert!(started.elapsed() < Duration::from_secs(3));

    let stats = h.tracker.get_tracking_stats();
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.snapshots_created, 1);
    let snap = h.tracker.get_current_ownership("fast").await.unwrap();
    assert_eq!(snap.ownership["b"], 7.0);
    assert!(matches!(
        h.tracker.get_current_ownership("slow").await,
        Err(TrackerError::InsufficientData { have: 0, .. })
    ));
}

// -- Concurrency -------------------------------------------------------------

#[tokio::test]
async fn test_pool_bounds_concurrent_updates() {
    let config = TrackerConfig {
        max_concurrent_updates: 3,
        ..TrackerConfig::default()
    };
    let h = HarnessBuilder::new().tracker_config(config).build();
    h.source.delay_all(Duration::from_millis(50));

    let lock = lock_in(&h, 2);
    for i in 0..20 {
        let id = format!("contest-{i:02}");
        h.source.script(&id, vec![vec![("a", 10.0)]], 100);
        h.tracker.track_contest(&id, lock).await.unwrap();
    }
    h.tracker.settle().await;

    assert_eq!(h.source.peak_concurrency(), 3);
    let stats = h.tracker.get_tracking_stats();
    assert_eq!(stats.snapshots_created, 20);
    assert_eq!(stats.error_count, 0);
}

#[tokio::test]
async fn test_shutdown_aborts_updates_after_grace() {
    let config = TrackerConfig {
        shutdown_grace_secs: 1,
        external_call_timeout_ms: 60_000,
        ..TrackerConfig::default()
    };
    let h = HarnessBuilder::new().tracker_config(config).build();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.source.delay("c1", Duration::from_secs(60));
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();

    let started = Instant::now();
    h.tracker.shutdown().await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5));

    assert_eq!(h.tracker.get_tracking_stats().snapshots_created, 0);
    let active = h.tracker.get_active_contests().await;
    assert_eq!(active.len(), 1);
    assert!(!active[0].in_flight);
}

// -- Queries -----------------------------------------------------------------

#[tokio::test]
async fn test_cache_hits_and_misses() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    h.tracker.get_current_ownership("c1").await.unwrap();
    let stats = h.tracker.get_tracking_stats();
    assert_eq!((stats.cache_hits, stats.cache_misses), (1, 0));

    // Past the cache TTL the read falls back to tracked state and refills.
    h.clock.advance(ChronoDuration::seconds(61));
    h.tracker.get_current_ownership("c1").await.unwrap();
    h.tracker.get_current_ownership("c1").await.unwrap();
    let stats = h.tracker.get_tracking_stats();
    assert_eq!((stats.cache_hits, stats.cache_misses), (2, 1));
}

#[tokio::test]
async fn test_unavailable_cache_falls_back_to_state() {
    let h = HarnessBuilder::new().failing_cache().build();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let snap = h.tracker.get_current_ownership("c1").await.unwrap();
    assert_eq!(snap.ownership["a"], 10.0);
    assert_eq!(h.tracker.get_tracking_stats().cache_misses, 1);
    assert!(h.tracker.get_cached_contests().await.is_err());
}

#[tokio::test]
async fn test_untracked_contest_queries() {
    let h = harness();
    assert_eq!(
        h.tracker.get_current_ownership("ghost").await.unwrap_err(),
        TrackerError::NotTracked("ghost".into())
    );
    assert!(matches!(
        h.tracker.get_leverage_scores("ghost").await,
        Err(TrackerError::NotTracked(_))
    ));
    assert!(matches!(
        h.tracker.predict_ownership("ghost", "a").await,
        Err(TrackerError::NotTracked(_))
    ));
}

#[tokio::test]
async fn test_trends_sorted_by_absolute_change() {
    let h = harness();
    h.source.script(
        "c1",
        vec![
            vec![("a", 10.0), ("b", 20.0), ("c", 5.0)],
            vec![("a", 12.0), ("b", 19.0), ("c", 5.0)],
            vec![("a", 16.0), ("b", 18.0), ("c", 5.0)],
        ],
        2_000,
    );
    h.tracker.track_contest("c1", lock_in(&h, 3)).await.unwrap();
    h.tracker.settle().await;

    // Too few samples yet.
    let early = h
        .tracker
        .get_ownership_trends("c1", ChronoDuration::hours(1))
        .await
        .unwrap();
    assert!(early.is_empty());

    next_cycle(&h).await;
    next_cycle(&h).await;

    let trends = h
        .tracker
        .get_ownership_trends("c1", ChronoDuration::hours(1))
        .await
        .unwrap();
    let players: Vec<_> = trends.iter().map(|t| t.player_id.as_str()).collect();
    assert_eq!(players, vec!["a", "b", "c"]);
    assert_eq!(trends[0].direction, TrendDirection::Up);
    assert!((trends[0].ownership_change - 6.0).abs() < 1e-9);
    assert_eq!(trends[1].direction, TrendDirection::Down);
    assert_eq!(trends[2].direction, TrendDirection::Stable);
    assert!(trends.iter().all(|t| t.data_points == 3));
    assert!(trends
        .iter()
        .all(|t| (0.0..=100.0).contains(&t.predicted_ownership_at_lock)));

    // Second read is served from cache and identical.
    let hits_before = h.tracker.get_tracking_stats().cache_hits;
    let again = h
        .tracker
        .get_ownership_trends("c1", ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(again, trends);
    assert_eq!(h.tracker.get_tracking_stats().cache_hits, hits_before + 1);
}

#[tokio::test]
async fn test_trend_cache_stays_bounded_over_many_cycles() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0), ("b", 20.0)]], 1_000);
    h.tracker.track_contest("c1", lock_in(&h, 5)).await.unwrap();
    h.tracker.settle().await;

    for _ in 0..200 {
        next_cycle(&h).await;
        h.tracker
            .get_ownership_trends("c1", ChronoDuration::hours(1))
            .await
            .unwrap();
    }

    // One current entry plus the trend lists younger than their TTL.
    assert!(h.cache.len().await <= 15);
}

#[tokio::test]
async fn test_predict_ownership_needs_enough_samples() {
    let h = harness();
    h.source.script(
        "c1",
        vec![vec![("a", 10.0)], vec![("a", 11.0)], vec![("a", 12.0)]],
        2_000,
    );
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let err = h.tracker.predict_ownership("c1", "a").await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::InsufficientData { have: 1, need: 3, .. }
    ));

    next_cycle(&h).await;
    next_cycle(&h).await;

    let prediction = h.tracker.predict_ownership("c1", "a").await.unwrap();
    assert_eq!(prediction.player_id, "a");
    assert_eq!(prediction.current_ownership, 12.0);
    assert_eq!(prediction.data_points, 3);
    assert!(prediction.predicted_ownership_at_lock > 12.0);
    assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
}

#[tokio::test]
async fn test_leverage_scores_come_from_calculator() {
    struct Fixed;
    impl LeverageCalculator for Fixed {
        fn calculate_leverage_scores(
            &self,
            ownership: &OwnershipMap,
            _total_entries: u64,
        ) -> HashMap<PlayerId, f64> {
            ownership.keys().map(|p| (p.clone(), 7.5)).collect()
        }
    }

    let h = HarnessBuilder::new().leverage(Arc::new(Fixed)).build();
    h.source.script("c1", vec![vec![("a", 10.0), ("b", 1.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let scores = h.tracker.get_leverage_scores("c1").await.unwrap();
    assert_eq!(scores.len(), 2);
    assert_eq!(scores["a"], 7.5);
    assert_eq!(scores["b"], 7.5);
}

#[tokio::test]
async fn test_history_and_cached_contests() {
    let h = harness();
    h.source.script(
        "c2",
        vec![vec![("a", 1.0)], vec![("a", 2.0)], vec![("a", 3.0)]],
        10,
    );
    h.source.script("c1", vec![vec![("a", 50.0)]], 10);
    h.tracker.track_contest("c2", lock_in(&h, 1)).await.unwrap();
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;
    next_cycle(&h).await;
    next_cycle(&h).await;

    let history = h.tracker.get_ownership_history("c2", 2).await.unwrap();
    let values: Vec<f64> = history.iter().map(|s| s.ownership["a"]).collect();
    assert_eq!(values, vec![2.0, 3.0]);

    let cached = h.tracker.get_cached_contests().await.unwrap();
    assert_eq!(cached, vec!["c1".to_string(), "c2".to_string()]);
    assert!(h.cache.len().await >= 2);
}

#[tokio::test]
async fn test_counters_only_grow() {
    let h = harness();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();
    h.tracker.settle().await;

    let mut last = h.tracker.get_tracking_stats();
    for _ in 0..5 {
        next_cycle(&h).await;
        let _ = h.tracker.get_current_ownership("c1").await;
        let now = h.tracker.get_tracking_stats();
        assert!(now.snapshots_created > last.snapshots_created);
        assert!(now.cache_hits + now.cache_misses > last.cache_hits + last.cache_misses);
        assert!(now.error_count >= last.error_count);
        assert!(now.avg_update_latency_ms >= 0.0);
        last = now;
    }
}

// -- Scheduler ---------------------------------------------------------------

#[tokio::test]
async fn test_run_exits_on_shutdown_signal() {
    let config = TrackerConfig {
        tick_interval_secs: 1,
        shutdown_grace_secs: 1,
        ..TrackerConfig::default()
    };
    let h = HarnessBuilder::new().tracker_config(config).build();
    h.source.script("c1", vec![vec![("a", 10.0)]], 100);
    h.tracker.track_contest("c1", lock_in(&h, 1)).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let tracker = h.tracker.clone();
    let runner = tokio::spawn(async move { tracker.run(rx).await });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), runner)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(h.tracker.get_tracking_stats().snapshots_created, 1);
    // No dispatch after shutdown.
    h.clock.advance(ChronoDuration::minutes(5));
    assert_eq!(h.tracker.tick().await, 0);
}

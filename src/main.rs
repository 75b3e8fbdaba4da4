//! Ownership tracker daemon.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the collaborators, starts tracking the configured contests and
//! runs the scheduler until Ctrl+C, then drains in-flight updates.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use ownership_tracker::cache::memory::MemoryCache;
use ownership_tracker::cache::Cache;
use ownership_tracker::clock::{Clock, SystemClock};
use ownership_tracker::config::AppConfig;
use ownership_tracker::leverage::InverseOwnershipLeverage;
use ownership_tracker::sources::http::HttpOwnershipSource;
use ownership_tracker::stacks::DefinedStacks;
use ownership_tracker::storage::sqlite::SqliteSnapshotStore;
use ownership_tracker::storage::{MemorySnapshotStore, SnapshotStore};
use ownership_tracker::tracker::{Collaborators, OwnershipTracker};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    info!(
        tick_secs = cfg.tracker.tick_interval_secs,
        default_interval_secs = cfg.tracker.default_update_interval_secs,
        pool = cfg.tracker.max_concurrent_updates,
        source = %cfg.source.base_url,
        storage = %cfg.storage.database_url,
        "Ownership tracker starting up"
    );

    // -- Initialise components -------------------------------------------

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&cfg).await?;
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));

    let api_key = match &cfg.source.api_key_env {
        Some(name) => match AppConfig::resolve_env(name) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Source API key unavailable; continuing unauthenticated");
                None
            }
        },
        None => None,
    };
    let source = HttpOwnershipSource::new(
        &cfg.source.base_url,
        api_key,
        Duration::from_secs(cfg.source.timeout_secs),
    )?;

    let stacks = DefinedStacks::new(cfg.stacks.clone());
    info!(stacks = stacks.len(), "Stack definitions loaded");

    let tracker = OwnershipTracker::new(
        cfg.tracker.clone(),
        cfg.trends.clone(),
        Collaborators {
            source: Arc::new(source),
            leverage: Arc::new(InverseOwnershipLeverage::default()),
            stacks: Arc::new(stacks),
            cache,
            store,
            clock,
        },
    );

    for contest in &cfg.contests {
        if let Err(e) = tracker.track_contest(&contest.id, contest.lock_time).await {
            error!(contest_id = %contest.id, error = %e, "Failed to start tracking");
        }
    }

    // -- Main loop -------------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.run(shutdown_rx).await })
    };

    info!(
        contests = cfg.contests.len(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        error!(error = %e, "Scheduler task failed");
    }

    let stats = tracker.get_tracking_stats();
    info!(
        contests = stats.contests_tracked,
        snapshots = stats.snapshots_created,
        errors = stats.error_count,
        avg_latency_ms = format!("{:.1}", stats.avg_update_latency_ms),
        "Ownership tracker shut down cleanly."
    );

    Ok(())
}

async fn open_store(cfg: &AppConfig) -> Result<Arc<dyn SnapshotStore>> {
    if cfg.storage.database_url == "memory" {
        warn!("Using in-memory snapshot store; snapshots are not durable");
        return Ok(Arc::new(MemorySnapshotStore::new()));
    }
    let store = SqliteSnapshotStore::connect(&cfg.storage.database_url)
        .await
        .with_context(|| format!("Failed to open snapshot store: {}", cfg.storage.database_url))?;
    for contest in &cfg.contests {
        match store.count(&contest.id).await {
            Ok(stored) => info!(contest_id = %contest.id, stored, "Existing snapshots"),
            Err(e) => warn!(contest_id = %contest.id, error = %e, "Could not count stored snapshots"),
        }
    }
    Ok(Arc::new(store))
}

/// Initialise tracing subscriber with env filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ownership_tracker=info"));

    let json_logging = std::env::var("OWNERSHIP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

//! SQLite snapshot log (via sqlx).
//!
//! Each snapshot is one row; the full snapshot is kept as JSON in
//! `payload`, with the fields we filter on broken out as columns.

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::SnapshotStore;
use crate::types::{OwnershipSnapshot, TrackerError, TrackerResult};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ownership_snapshots (
    id                TEXT PRIMARY KEY,
    contest_id        TEXT NOT NULL,
    taken_at          TEXT NOT NULL,
    total_entries     INTEGER NOT NULL,
    time_to_lock_secs INTEGER NOT NULL,
    payload           TEXT NOT NULL
)
"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ownership_snapshots_contest
    ON ownership_snapshots (contest_id, taken_at)
"#;

fn persistence_err(context: &str) -> impl Fn(sqlx::Error) -> TrackerError + '_ {
    move |e| TrackerError::Persistence(format!("{context}: {e}"))
}

pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> TrackerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(persistence_err("invalid database url"))?
            .create_if_missing(true);

        // Every connection to `:memory:` is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(persistence_err("failed to open snapshot database"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Snapshot store ready");
        Ok(store)
    }

    async fn migrate(&self) -> TrackerResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(persistence_err("create table"))?;
        sqlx::query(CREATE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(persistence_err("create index"))?;
        Ok(())
    }

    /// Number of snapshots stored for a contest.
    pub async fn count(&self, contest_id: &str) -> TrackerResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ownership_snapshots WHERE contest_id = ?")
                .bind(contest_id)
                .fetch_one(&self.pool)
                .await
                .map_err(persistence_err("count snapshots"))?;
        Ok(count)
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn append(&self, snapshot: &OwnershipSnapshot) -> TrackerResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        let total_entries = i64::try_from(snapshot.total_entries).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO ownership_snapshots
                (id, contest_id, taken_at, total_entries, time_to_lock_secs, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot.id.to_string())
        .bind(&snapshot.contest_id)
        .bind(snapshot.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(total_entries)
        .bind(snapshot.time_to_lock_secs)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(persistence_err("append snapshot"))?;

        debug!(contest_id = %snapshot.contest_id, id = %snapshot.id, "Snapshot persisted");
        Ok(())
    }
}

//! Persistence layer.
//!
//! Snapshots are appended to a durable log, one per contest per update
//! cycle. Nothing in this crate ever deletes or rewrites a snapshot.

pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{OwnershipSnapshot, TrackerResult};

/// Append-only snapshot log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(&self, snapshot: &OwnershipSnapshot) -> TrackerResult<()>;
}

/// Process-local store. Used when `storage.database_url = "memory"` and in tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<Vec<OwnershipSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    /// All stored snapshots for one contest, oldest first.
    pub async fn snapshots_for(&self, contest_id: &str) -> Vec<OwnershipSnapshot> {
        self.snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.contest_id == contest_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(&self, snapshot: &OwnershipSnapshot) -> TrackerResult<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }
}

//! Registry of tracked contests.
//!
//! Lock ordering: the registry lock is taken only to add, remove, look up
//! or enumerate handles and is always released before any contest state
//! lock is taken or any I/O starts. Callers get `Arc` handles and work on
//! them outside the registry lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::state::ContestHandle;
use crate::types::{ContestId, TrackerError, TrackerResult};

#[derive(Debug, Default)]
pub struct ContestRegistry {
    contests: RwLock<HashMap<ContestId, Arc<ContestHandle>>>,
}

impl ContestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: Arc<ContestHandle>) -> TrackerResult<()> {
        let mut contests = self.contests.write().await;
        if contests.contains_key(&handle.contest_id) {
            return Err(TrackerError::AlreadyTracked(handle.contest_id.clone()));
        }
        contests.insert(handle.contest_id.clone(), handle);
        Ok(())
    }

    pub async fn remove(&self, contest_id: &str) -> Option<Arc<ContestHandle>> {
        self.contests.write().await.remove(contest_id)
    }

    pub async fn get(&self, contest_id: &str) -> Option<Arc<ContestHandle>> {
        self.contests.read().await.get(contest_id).cloned()
    }

    /// All handles, ordered by contest id.
    pub async fn handles(&self) -> Vec<Arc<ContestHandle>> {
        let mut handles: Vec<_> = self.contests.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.contest_id.cmp(&b.contest_id));
        handles
    }

    pub async fn len(&self) -> usize {
        self.contests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contests.read().await.is_empty()
    }
}

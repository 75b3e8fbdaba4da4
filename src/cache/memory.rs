//! In-process TTL cache.
//!
//! Entries expire lazily on read. Expired entries are swept whenever
//! `keys` or `evict_expired` runs, and by `set` at most once per
//! `SWEEP_INTERVAL_SECS`, so the map stays bounded by the live key set
//! even when callers only write. Expiry is measured with the injected
//! `Clock`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{glob_match, Cache};
use crate::clock::Clock;
use crate::types::{TrackerError, TrackerResult};

const SWEEP_INTERVAL_SECS: i64 = 30;

struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    next_sweep: Option<DateTime<Utc>>,
}

impl Entries {
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires_at > now);
        self.next_sweep = Some(now + chrono::Duration::seconds(SWEEP_INTERVAL_SECS));
        before - self.map.len()
    }
}

pub struct MemoryCache {
    entries: RwLock<Entries>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            clock,
        }
    }

    /// Remove expired entries.
    pub async fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        self.entries.write().await.sweep(now)
    }

    /// Entries held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.map.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> TrackerResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .map
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> TrackerResult<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| TrackerError::Cache(format!("invalid ttl for {key}: {e}")))?;
        let now = self.clock.now();
        let expires_at = now + ttl;

        let mut entries = self.entries.write().await;
        if entries.next_sweep.map_or(true, |at| now >= at) {
            entries.sweep(now);
        }
        entries
            .map
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> TrackerResult<Vec<String>> {
        self.evict_expired().await;
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .map
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

//! Key-value cache seam.
//!
//! The tracker writes serialized snapshots and trend lists through a
//! `Cache` so live reads can be served without touching tracker state.
//! Cache failures are never fatal: callers fall back to in-memory state.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{ContestId, TrackerResult};

pub const CURRENT_KEY_PREFIX: &str = "ownership:current:";
pub const TRENDS_KEY_PREFIX: &str = "ownership:trends:";

/// Key holding the latest snapshot for a contest.
pub fn current_key(contest_id: &str) -> String {
    format!("{CURRENT_KEY_PREFIX}{contest_id}")
}

/// Key holding a sorted trend list. `version` changes whenever the
/// contest gets a new sample, so stale lists are never read back.
pub fn trends_key(contest_id: &str, range_secs: i64, version: i64) -> String {
    format!("{TRENDS_KEY_PREFIX}{contest_id}:{range_secs}:{version}")
}

/// Recover the contest id from a `current_key`.
pub fn contest_from_current_key(key: &str) -> Option<ContestId> {
    key.strip_prefix(CURRENT_KEY_PREFIX).map(String::from)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> TrackerResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> TrackerResult<()>;

    /// Keys matching a glob pattern where `*` matches any run of characters.
    async fn keys(&self, pattern: &str) -> TrackerResult<Vec<String>>;
}

/// Glob match supporting `*` wildcards only.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

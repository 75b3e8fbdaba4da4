//! Ownership sources.
//!
//! Defines the `OwnershipSource` trait. Raw per-lineup collection lives
//! outside this crate; a source only reports the aggregated percentages
//! for a contest at the moment it is asked.

pub mod http;

use async_trait::async_trait;

use crate::types::{ContestId, OwnershipMap, TrackerResult};

/// Aggregated ownership for one contest, as reported by a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OwnershipFetch {
    pub ownership: OwnershipMap,
    pub total_entries: u64,
}

/// Abstraction over upstream ownership feeds.
///
/// Implementors should fail fast; the tracker wraps every call in its own
/// timeout and never retries within a cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OwnershipSource: Send + Sync {
    /// Fetch current ownership percentages and the entry count for a contest.
    async fn fetch_ownership(&self, contest_id: &ContestId) -> TrackerResult<OwnershipFetch>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

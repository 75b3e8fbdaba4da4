//! Contest ownership tracker.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod clock;
pub mod config;
pub mod leverage;
pub mod sources;
pub mod stacks;
pub mod storage;
pub mod tracker;
pub mod trends;
pub mod types;

//! Integration test suite.

mod mock_source;
mod tracker_flow;

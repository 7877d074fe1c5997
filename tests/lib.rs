//! Shared fixtures for the LanShare integration tests.

pub mod fixtures;

pub use fixtures::{TransferFixture, pattern_bytes, wait_for_state, write_tree};

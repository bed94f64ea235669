//! Shared test utilities for convhub integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated service instances backed by temp directories
//! - `FakeExecutor`, a scripted stand-in for the external converter
//! - `SlowStore`, a job store wrapper that delays updates

pub mod executor;
pub mod harness;
pub mod stores;

pub use executor::{FakeExecutor, FakeOutcome};
pub use harness::TestHarness;
pub use stores::SlowStore;

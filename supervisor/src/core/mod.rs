//! Deterministic, pure logic for run bookkeeping.
//!
//! Core modules must be free of I/O side effects. Time enters as an argument,
//! so transitions are reproducible in tests.

pub mod budget;
pub mod classifier;
pub mod metrics;
pub mod run_state;
pub mod summary;
pub mod types;

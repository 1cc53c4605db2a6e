//! Bounded, observable step-execution supervisor.
//!
//! A supervised task runs as a sequence of steps performed by an external
//! actor. The supervisor enforces a step ceiling, tracks retries and token
//! usage, honors pause/resume/stop requests between steps, and produces a
//! machine-readable summary of the run.
//!
//! - **[`core`]**: Pure, deterministic run bookkeeping and step
//!   classification. No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config files, child processes).
//!
//! [`monitor`] and [`control`] are the thread-safe handles shared with
//! observers; [`looping`] drives a run using both.

pub mod control;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod monitor;
pub mod signal;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

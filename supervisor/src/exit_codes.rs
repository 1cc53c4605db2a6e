//! Stable exit codes for `supervisor` CLI commands.

use crate::core::types::ExecutionStatus;
use crate::looping::{LoopOutcome, LoopStop};

/// The task completed (`SUCCESS`), or a non-run command succeeded.
pub const OK: i32 = 0;
/// Invalid config, arguments, or another setup error.
pub const INVALID: i32 = 1;
/// The run finished `FAILED` (failure threshold or exhausted steps).
pub const FAILED: i32 = 2;
/// The step-count circuit breaker tripped.
pub const STEP_LIMIT: i32 = 3;
/// The run was stopped by a controller.
pub const CANCELLED: i32 = 4;
/// A second interrupt abandoned the run (128 + SIGINT).
pub const ABORTED: i32 = 130;

/// Exit code for a monitor status. A still-running monitor was abandoned.
pub fn for_status(status: ExecutionStatus) -> i32 {
    match status {
        ExecutionStatus::Success => OK,
        ExecutionStatus::Failed => FAILED,
        ExecutionStatus::StepLimitExceeded => STEP_LIMIT,
        ExecutionStatus::Cancelled => CANCELLED,
        ExecutionStatus::Running => ABORTED,
    }
}

pub fn for_outcome(outcome: &LoopOutcome) -> i32 {
    match outcome.stop {
        LoopStop::Aborted => ABORTED,
        _ => for_status(outcome.status),
    }
}

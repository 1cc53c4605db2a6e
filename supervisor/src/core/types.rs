//! Shared deterministic types for supervisor core logic.
//!
//! These types define stable contracts between the monitor, the loop, and the
//! collaborators it drives. They carry no I/O and no clocks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::metrics::TokenUsage;

/// Status of a run. Every value except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    StepLimitExceeded,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::StepLimitExceeded => "STEP_LIMIT_EXCEEDED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer a retry is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryKind {
    /// The execution mechanism failed (actor error, absorbed action failure).
    System,
    /// The actor claimed completion but output validation rejected it.
    Business,
}

impl RetryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryKind::System => "SYSTEM",
            RetryKind::Business => "BUSINESS",
        }
    }
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normal-return value of one actor invocation.
///
/// Abnormal termination is not represented here: the actor returns `Err`
/// instead, and the loop converts it into retry bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOutcome {
    /// The actor considers the task logically complete.
    pub completed: bool,
    /// Increase of the actor's own failure counter during this step, for
    /// failures it absorbed without erroring.
    pub failure_delta: u32,
    /// Token usage the actor did not already report through the step context.
    pub tokens: Option<TokenUsage>,
}

impl StepOutcome {
    pub fn in_progress() -> Self {
        Self::default()
    }

    pub fn completed() -> Self {
        Self {
            completed: true,
            ..Self::default()
        }
    }

    pub fn with_failures(mut self, failure_delta: u32) -> Self {
        self.failure_delta = failure_delta;
        self
    }

    pub fn with_tokens(mut self, prompt: u64, completion: u64) -> Self {
        let mut usage = TokenUsage::default();
        usage.add(prompt, completion);
        self.tokens = Some(usage);
        self
    }
}

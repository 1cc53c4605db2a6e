//! Metrics primitives owned by a run: token accounting, step and retry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::RetryKind;

/// Token accumulator. `total_tokens == prompt_tokens + completion_tokens` at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Add usage. Saturates instead of wrapping.
    pub fn add(&mut self, prompt: u64, completion: u64) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(prompt);
        self.completion_tokens = self.completion_tokens.saturating_add(completion);
        self.total_tokens = self.prompt_tokens.saturating_add(self.completion_tokens);
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

/// Timing and outcome of one step. Sealed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_number: u32,
    pub action_label: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

impl StepRecord {
    pub(crate) fn open(step_number: u32, action_label: &str, now: DateTime<Utc>) -> Self {
        Self {
            step_number,
            action_label: action_label.to_string(),
            start_time: now,
            end_time: None,
            duration_secs: None,
            success: false,
            error: None,
        }
    }

    pub(crate) fn seal(mut self, success: bool, error: Option<String>, now: DateTime<Utc>) -> Self {
        self.end_time = Some(now);
        self.duration_secs = Some(seconds_between(self.start_time, now));
        self.success = success;
        self.error = error;
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// A classified retry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Step during which the retry was observed (0 before any step).
    pub step_number: u32,
    pub kind: RetryKind,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Non-negative elapsed seconds between two wall-clock instants.
///
/// Clock steps backwards clamp to zero.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .to_std()
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

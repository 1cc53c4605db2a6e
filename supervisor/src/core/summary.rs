//! Serializable run summary and its human-readable rendering.
//!
//! The summary mirrors the wire shape consumed by dashboards one-to-one, so
//! adding a field here is a contract change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::metrics::TokenUsage;
use crate::core::run_state::RunState;
use crate::core::types::{ExecutionStatus, RetryKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub task_id: String,
    pub status: ExecutionStatus,
    pub execution: ExecutionSummary,
    pub tokens: TokenUsage,
    pub retries: RetrySummary,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub current_step: u32,
    pub max_steps: u32,
    /// Seconds, rounded to two decimals.
    pub total_duration: f64,
    /// Seconds, rounded to two decimals.
    pub average_step_duration: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySummary {
    pub system_retry_count: u32,
    pub business_retry_count: u32,
    pub total_retry_count: u32,
    pub detail: Vec<RetryDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDetail {
    pub step: u32,
    pub kind: RetryKind,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: u32,
    pub action: String,
    pub duration: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

impl RunSummary {
    /// Snapshot `state` as of `now`. Reads only.
    pub fn from_state(state: &RunState, now: DateTime<Utc>) -> Self {
        let retries = state.retries();
        Self {
            task_id: state.task_id().to_string(),
            status: state.status(),
            execution: ExecutionSummary {
                current_step: state.current_step(),
                max_steps: state.max_steps(),
                total_duration: round2(state.total_duration(now)),
                average_step_duration: round2(state.average_step_duration()),
                start_time: state.start_time(),
                end_time: state.end_time(),
            },
            tokens: state.tokens(),
            retries: RetrySummary {
                system_retry_count: state.system_retry_count(),
                business_retry_count: state.business_retry_count(),
                total_retry_count: retries.len() as u32,
                detail: retries
                    .iter()
                    .map(|r| RetryDetail {
                        step: r.step_number,
                        kind: r.kind,
                        reason: r.reason.clone(),
                        timestamp: r.timestamp,
                    })
                    .collect(),
            },
            steps: state
                .steps()
                .iter()
                .map(|s| StepSummary {
                    step: s.step_number,
                    action: s.action_label.clone(),
                    duration: s.duration_secs.map(round2),
                    success: s.success,
                    error: s.error.clone(),
                })
                .collect(),
        }
    }

    /// Render the metrics block shown to operators.
    pub fn render_text(&self) -> String {
        let execution = &self.execution;
        let mut buf = String::new();
        buf.push_str("### Execution metrics\n\n");
        buf.push_str(&format!("**Task**: {}\n", self.task_id));
        buf.push_str(&format!("**Status**: {}\n\n", self.status));
        buf.push_str("**Execution**:\n");
        buf.push_str(&format!(
            "- Steps: {} / {}\n",
            execution.current_step, execution.max_steps
        ));
        buf.push_str(&format!("- Total duration: {:.2}s\n", execution.total_duration));
        buf.push_str(&format!(
            "- Average step duration: {:.2}s\n\n",
            execution.average_step_duration
        ));
        buf.push_str("**Tokens**:\n");
        buf.push_str(&format!("- Prompt: {}\n", self.tokens.prompt_tokens));
        buf.push_str(&format!("- Completion: {}\n", self.tokens.completion_tokens));
        buf.push_str(&format!("- Total: {}\n\n", self.tokens.total_tokens));
        buf.push_str("**Retries**:\n");
        buf.push_str(&format!("- System: {}\n", self.retries.system_retry_count));
        buf.push_str(&format!("- Business: {}\n", self.retries.business_retry_count));
        buf.push_str(&format!("- Total: {}", self.retries.total_retry_count));
        buf
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

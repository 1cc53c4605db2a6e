//! Deterministic classification of one actor invocation into step outcome and retries.
//!
//! - Actor error: the step failed; one `SYSTEM` retry unless it was the final step.
//! - Normal return with a failure-counter increase: the step completed, but one
//!   `SYSTEM` retry per unit of increase unless it was the final step.
//! - Clean return: the step completed and the consecutive-failure streak resets.

use crate::core::budget::StepBudget;
use crate::core::types::{RetryKind, StepOutcome};

/// Reason recorded for a business retry.
pub const VALIDATION_FAILED: &str = "output validation failed";

/// A retry the monitor must record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub kind: RetryKind,
    pub reason: String,
}

/// How one actor invocation is booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepClassification {
    /// Outcome written to the step record.
    pub success: bool,
    /// Error written to the step record.
    pub error: Option<String>,
    /// Retries to record, in order.
    pub retries: Vec<RetryEvent>,
    /// Consecutive actor failures after this step.
    pub consecutive_failures: u32,
}

/// Classify a step result.
///
/// `result` is `Err(message)` when the actor terminated abnormally.
pub fn classify_step(
    result: Result<&StepOutcome, &str>,
    step_number: u32,
    budget: StepBudget,
    consecutive_before: u32,
) -> StepClassification {
    let is_final = budget.is_final(step_number);
    match result {
        Err(message) => {
            let mut retries = Vec::new();
            if !is_final {
                retries.push(RetryEvent {
                    kind: RetryKind::System,
                    reason: format!("step exception: {message}"),
                });
            }
            StepClassification {
                success: false,
                error: Some(message.to_string()),
                retries,
                consecutive_failures: consecutive_before.saturating_add(1),
            }
        }
        Ok(outcome) if outcome.failure_delta > 0 => {
            let after = consecutive_before.saturating_add(outcome.failure_delta);
            let retries = if is_final {
                Vec::new()
            } else {
                (0..outcome.failure_delta)
                    .map(|_| RetryEvent {
                        kind: RetryKind::System,
                        reason: format!("action execution failed (failure #{after})"),
                    })
                    .collect()
            };
            StepClassification {
                success: true,
                error: None,
                retries,
                consecutive_failures: after,
            }
        }
        Ok(_) => StepClassification {
            success: true,
            error: None,
            retries: Vec::new(),
            consecutive_failures: 0,
        },
    }
}

/// Map a validator verdict to the business retry it implies, if any.
///
/// A validator error counts as a rejection.
pub fn classify_validation(verdict: Result<bool, &str>) -> Option<RetryEvent> {
    match verdict {
        Ok(true) => None,
        Ok(false) => Some(RetryEvent {
            kind: RetryKind::Business,
            reason: VALIDATION_FAILED.to_string(),
        }),
        Err(message) => Some(RetryEvent {
            kind: RetryKind::Business,
            reason: format!("{VALIDATION_FAILED}: {message}"),
        }),
    }
}

//! In-memory state of a single run and its invariant-preserving transitions.
//!
//! All transitions take the current wall-clock time as an argument so they stay
//! deterministic under test. The monitor owns the clock and the lock.

use chrono::{DateTime, Utc};

use crate::core::metrics::{RetryRecord, StepRecord, TokenUsage, seconds_between};
use crate::core::types::{ExecutionStatus, RetryKind};

/// Error recorded on a step that was still open when the next one started.
pub const ABANDONED_STEP_ERROR: &str = "step abandoned";

/// Result of asking the run to admit a new step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Step opened with this 1-based number.
    Admitted { step_number: u32 },
    /// The step ceiling was crossed; the run is now `STEP_LIMIT_EXCEEDED`.
    LimitExceeded { attempted: u32, max_steps: u32 },
    /// The run already holds a terminal status.
    Terminal(ExecutionStatus),
}

/// Side effects a transition had, reported back for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Yes,
    /// Ignored because the run is terminal.
    Terminal,
    /// Ignored because no step was open.
    NoOpenStep,
}

#[derive(Debug, Clone)]
pub struct RunState {
    task_id: String,
    max_steps: u32,
    current_step: u32,
    status: ExecutionStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    tokens: TokenUsage,
    steps: Vec<StepRecord>,
    retries: Vec<RetryRecord>,
    system_retry_count: u32,
    business_retry_count: u32,
    open_step: Option<StepRecord>,
    abandoned_steps: u32,
}

impl RunState {
    pub fn new(task_id: String, max_steps: u32, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            max_steps,
            current_step: 0,
            status: ExecutionStatus::Running,
            start_time: now,
            end_time: None,
            tokens: TokenUsage::default(),
            steps: Vec::new(),
            retries: Vec::new(),
            system_retry_count: 0,
            business_retry_count: 0,
            open_step: None,
            abandoned_steps: 0,
        }
    }

    /// Admit the next step, tripping the circuit breaker past `max_steps`.
    ///
    /// A step still open from a previous call is sealed as failed first.
    pub fn start_step(&mut self, action_label: &str, now: DateTime<Utc>) -> Admission {
        if self.status.is_terminal() {
            return Admission::Terminal(self.status);
        }
        if self.open_step.is_some() {
            self.abandoned_steps += 1;
            self.finish_step(false, Some(ABANDONED_STEP_ERROR.to_string()), now);
        }

        let attempted = self.current_step.saturating_add(1);
        if attempted > self.max_steps {
            self.status = ExecutionStatus::StepLimitExceeded;
            self.end_time = Some(now);
            return Admission::LimitExceeded {
                attempted,
                max_steps: self.max_steps,
            };
        }

        self.current_step = attempted;
        self.open_step = Some(StepRecord::open(attempted, action_label, now));
        Admission::Admitted {
            step_number: attempted,
        }
    }

    /// Seal the open step and append it to the step list.
    pub fn finish_step(
        &mut self,
        success: bool,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Applied {
        let Some(open) = self.open_step.take() else {
            return Applied::NoOpenStep;
        };
        self.steps.push(open.seal(success, error, now));
        Applied::Yes
    }

    pub fn record_retry(&mut self, kind: RetryKind, reason: &str, now: DateTime<Utc>) -> Applied {
        if self.status.is_terminal() {
            return Applied::Terminal;
        }
        self.retries.push(RetryRecord {
            step_number: self.current_step,
            kind,
            reason: reason.to_string(),
            timestamp: now,
        });
        match kind {
            RetryKind::System => self.system_retry_count += 1,
            RetryKind::Business => self.business_retry_count += 1,
        }
        Applied::Yes
    }

    pub fn record_tokens(&mut self, prompt: u64, completion: u64) -> Applied {
        if self.status.is_terminal() {
            return Applied::Terminal;
        }
        self.tokens.add(prompt, completion);
        Applied::Yes
    }

    /// Assign the terminal status. First terminal write wins.
    pub fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) -> Applied {
        if self.status.is_terminal() || !status.is_terminal() {
            return Applied::Terminal;
        }
        if let Some(open) = self.open_step.take() {
            self.steps.push(open.seal(false, Some(ABANDONED_STEP_ERROR.to_string()), now));
            self.abandoned_steps += 1;
        }
        self.status = status;
        self.end_time = Some(now);
        Applied::Yes
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn tokens(&self) -> TokenUsage {
        self.tokens
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn retries(&self) -> &[RetryRecord] {
        &self.retries
    }

    pub fn system_retry_count(&self) -> u32 {
        self.system_retry_count
    }

    pub fn business_retry_count(&self) -> u32 {
        self.business_retry_count
    }

    pub fn has_open_step(&self) -> bool {
        self.open_step.is_some()
    }

    pub fn abandoned_steps(&self) -> u32 {
        self.abandoned_steps
    }

    /// Seconds from start to end, or to `now` while the run is live.
    pub fn total_duration(&self, now: DateTime<Utc>) -> f64 {
        seconds_between(self.start_time, self.end_time.unwrap_or(now))
    }

    /// Mean sealed step duration; `0.0` with no steps.
    pub fn average_step_duration(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let total: f64 = self.steps.iter().filter_map(|s| s.duration_secs).sum();
        total / self.steps.len() as f64
    }
}

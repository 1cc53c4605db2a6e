//! Execution monitor: the single source of truth for a run's progress.
//!
//! The monitor is a cheap, cloneable handle. The loop is its only writer;
//! status and summary readers may live on other threads. Every method applies
//! its whole mutation under one lock, so readers never observe a torn update.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::metrics::TokenUsage;
use crate::core::run_state::{Admission, Applied, RunState};
use crate::core::summary::RunSummary;
use crate::core::types::{ExecutionStatus, RetryKind};

#[derive(Debug, Clone)]
pub struct ExecutionMonitor {
    state: Arc<Mutex<RunState>>,
}

impl ExecutionMonitor {
    /// Create a monitor for a new run.
    ///
    /// Without a `task_id`, one is derived from the current time (`task_<unix-secs>`).
    pub fn new(max_steps: u32, task_id: Option<String>) -> Self {
        let now = Utc::now();
        let task_id = task_id.unwrap_or_else(|| default_task_id(now.timestamp()));
        info!(task_id = %task_id, max_steps, "execution monitor initialized");
        Self {
            state: Arc::new(Mutex::new(RunState::new(task_id, max_steps, now))),
        }
    }

    // Mutations keep RunState consistent even if a reader panicked mid-read.
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit the next step; `false` means the caller must not invoke the actor.
    pub fn start_step(&self, action_label: &str) -> bool {
        matches!(self.admit_step(action_label), Admission::Admitted { .. })
    }

    /// Like [`start_step`](Self::start_step), reporting why a step was refused.
    pub fn admit_step(&self, action_label: &str) -> Admission {
        let (admission, abandoned_before, abandoned_after) = {
            let mut state = self.lock();
            let before = state.abandoned_steps();
            let admission = state.start_step(action_label, Utc::now());
            (admission, before, state.abandoned_steps())
        };
        if abandoned_after > abandoned_before {
            warn!(action_label, "previous step was still open; sealed as abandoned");
        }
        match &admission {
            Admission::Admitted { step_number } => {
                debug!(step = step_number, action_label, "step started");
            }
            Admission::LimitExceeded {
                attempted,
                max_steps,
            } => {
                warn!(
                    current_step = attempted,
                    max_steps, "step limit exceeded"
                );
            }
            Admission::Terminal(status) => {
                debug!(%status, action_label, "step refused: run already terminal");
            }
        }
        admission
    }

    /// Seal the open step. Tolerates being called with no open step.
    pub fn finish_step(&self, success: bool, error: Option<String>) {
        let (applied, step, duration) = {
            let mut state = self.lock();
            let applied = state.finish_step(success, error, Utc::now());
            let last = state.steps().last();
            (
                applied,
                last.map(|s| s.step_number),
                last.and_then(|s| s.duration_secs),
            )
        };
        match applied {
            Applied::Yes => debug!(
                step = ?step,
                duration_secs = duration.unwrap_or_default(),
                success,
                "step finished"
            ),
            _ => debug!("finish_step ignored: no open step"),
        }
    }

    pub fn record_retry(&self, kind: RetryKind, reason: &str) {
        let (applied, step) = {
            let mut state = self.lock();
            let applied = state.record_retry(kind, reason, Utc::now());
            (applied, state.current_step())
        };
        match applied {
            Applied::Yes => info!(step, %kind, reason, "retry recorded"),
            _ => debug!(%kind, reason, "retry ignored: run already terminal"),
        }
    }

    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        let (applied, total) = {
            let mut state = self.lock();
            let applied = state.record_tokens(prompt, completion);
            (applied, state.tokens().total_tokens)
        };
        match applied {
            Applied::Yes => debug!(prompt, completion, total, "tokens recorded"),
            _ => debug!(prompt, completion, "tokens ignored: run already terminal"),
        }
    }

    /// Assign the terminal status. Returns `false` if a terminal status was already set.
    pub fn finish(&self, status: ExecutionStatus) -> bool {
        let now = Utc::now();
        let (applied, had_open_step, current, final_status, max_steps, duration) = {
            let mut state = self.lock();
            let had_open_step = state.has_open_step();
            let applied = state.finish(status, now);
            (
                applied,
                had_open_step,
                state.current_step(),
                state.status(),
                state.max_steps(),
                state.total_duration(now),
            )
        };
        if applied == Applied::Yes {
            if had_open_step {
                warn!(step = current, "step still open at finish; sealed as abandoned");
            }
            info!(
                status = %final_status,
                duration_secs = format_args!("{duration:.2}"),
                steps = format_args!("{current}/{max_steps}"),
                "execution finished"
            );
            true
        } else {
            debug!(requested = %status, current = %final_status, "finish ignored");
            false
        }
    }

    /// Snapshot the run. Never mutates.
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_state(&self.lock(), Utc::now())
    }

    pub fn metrics_text(&self) -> String {
        self.summary().render_text()
    }

    pub fn task_id(&self) -> String {
        self.lock().task_id().to_string()
    }

    pub fn max_steps(&self) -> u32 {
        self.lock().max_steps()
    }

    pub fn current_step(&self) -> u32 {
        self.lock().current_step()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn tokens(&self) -> TokenUsage {
        self.lock().tokens()
    }

    pub fn total_duration(&self) -> f64 {
        self.lock().total_duration(Utc::now())
    }

    pub fn average_step_duration(&self) -> f64 {
        self.lock().average_step_duration()
    }

    /// Handle that can only add token usage, for handing to actors.
    pub fn token_recorder(&self) -> TokenRecorder {
        TokenRecorder {
            monitor: self.clone(),
        }
    }
}

/// Write-only view of a monitor's token accounting.
#[derive(Debug, Clone)]
pub struct TokenRecorder {
    monitor: ExecutionMonitor,
}

impl TokenRecorder {
    pub fn record(&self, prompt: u64, completion: u64) {
        self.monitor.record_tokens(prompt, completion);
    }
}

fn default_task_id(unix_secs: i64) -> String {
    format!("task_{unix_secs}")
}

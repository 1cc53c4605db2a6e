//! The supervised execution loop.
//!
//! [`RunController`] invokes the actor once per step until the task completes,
//! the budget runs out, or a controller intervenes. Every exit except a forced
//! abort leaves the monitor terminal.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::control::{LoopPhase, PauseOutcome, RunControl};
use crate::core::budget::StepBudget;
use crate::core::classifier::{RetryEvent, classify_step, classify_validation};
use crate::core::run_state::Admission;
use crate::core::types::{ExecutionStatus, StepOutcome};
use crate::io::actor::{StepActor, StepContext};
use crate::io::config::SupervisorConfig;
use crate::io::validator::OutputValidator;
use crate::monitor::ExecutionMonitor;

/// Marker attached to a run that used every step without completing.
pub const EXHAUSTED_MARKER: &str = "failed to complete task in maximum steps";

/// Loop parameters, usually derived from [`SupervisorConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_steps: u32,
    pub max_failures: u32,
    pub validate_output: bool,
    pub pause_poll_interval: Duration,
    /// Outcomes reporting more absorbed failures than this fail the step instead.
    pub max_failure_delta: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for LoopConfig {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_failures: config.max_failures,
            validate_output: config.validate_output,
            pause_poll_interval: config.pause_poll_interval(),
            max_failure_delta: config.actor.max_failure_delta,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            bail!("max_steps must be > 0");
        }
        if self.max_failures == 0 {
            bail!("max_failures must be > 0");
        }
        if self.pause_poll_interval.is_zero() {
            bail!("pause_poll_interval must be > 0");
        }
        if self.max_failure_delta == 0 {
            bail!("max_failure_delta must be > 0");
        }
        Ok(())
    }
}

/// Reason why the loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The actor completed the task and validation (if any) accepted it.
    Completed,
    /// A stop request was observed between steps.
    Cancelled,
    /// Consecutive actor failures reached the configured threshold.
    TooManyFailures { consecutive: u32, max: u32 },
    /// The monitor refused a step past its ceiling.
    StepLimitExceeded { step: u32, max: u32 },
    /// Every step ran without the task completing.
    MaxStepsReached { max: u32 },
    /// A second interrupt arrived while paused. The monitor was left running.
    Aborted,
    /// The monitor was finished by someone else mid-run.
    Preempted { status: ExecutionStatus },
}

impl LoopStop {
    /// Terminal status the loop assigns for this stop, if any.
    fn status(&self) -> Option<ExecutionStatus> {
        match self {
            LoopStop::Completed => Some(ExecutionStatus::Success),
            LoopStop::Cancelled => Some(ExecutionStatus::Cancelled),
            LoopStop::TooManyFailures { .. } | LoopStop::MaxStepsReached { .. } => {
                Some(ExecutionStatus::Failed)
            }
            LoopStop::StepLimitExceeded { .. } => Some(ExecutionStatus::StepLimitExceeded),
            LoopStop::Aborted | LoopStop::Preempted { .. } => None,
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub task_id: String,
    /// Monitor status after the loop returned.
    pub status: ExecutionStatus,
    /// Actor invocations made by this call.
    pub steps_executed: u32,
    pub stop: LoopStop,
    /// Failure marker for outcomes that need one.
    pub marker: Option<String>,
}

/// What happened in one step, handed to the `on_step` observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step_number: u32,
    pub success: bool,
    pub completed: bool,
    pub error: Option<String>,
    /// Retries recorded for this step, in order.
    pub retries: Vec<RetryEvent>,
    /// Validator verdict, when the validator ran.
    pub accepted: Option<bool>,
    pub consecutive_failures: u32,
}

/// Drives one run against a monitor and a control handle.
pub struct RunController<'a, A: StepActor + ?Sized> {
    actor: &'a mut A,
    validator: Option<&'a mut dyn OutputValidator>,
    monitor: ExecutionMonitor,
    control: RunControl,
    config: LoopConfig,
}

impl<'a, A: StepActor + ?Sized> RunController<'a, A> {
    pub fn new(
        actor: &'a mut A,
        monitor: ExecutionMonitor,
        control: RunControl,
        config: LoopConfig,
    ) -> Self {
        Self {
            actor,
            validator: None,
            monitor,
            control,
            config,
        }
    }

    pub fn with_validator(mut self, validator: &'a mut dyn OutputValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Run until a stop condition.
    ///
    /// Actor errors and panics never surface here; only an unusable setup
    /// returns `Err`, before any step runs.
    pub fn run<F: FnMut(&StepReport)>(&mut self, mut on_step: F) -> Result<LoopOutcome> {
        self.check_setup()?;

        let budget = StepBudget::new(self.config.max_steps);
        let task_id = self.monitor.task_id();
        info!(
            task_id = %task_id,
            max_steps = budget.max_steps(),
            max_failures = self.config.max_failures,
            validate_output = self.config.validate_output,
            "run started"
        );

        let mut consecutive_failures = 0u32;
        let mut steps_executed = 0u32;

        for index in 0..budget.max_steps() {
            self.control.set_phase(LoopPhase::Running);
            if let Some(stop) = self.check_controls(consecutive_failures) {
                return Ok(self.conclude(task_id, stop, steps_executed, None));
            }

            let step_number = match self.monitor.admit_step(&format!("step_{index}")) {
                Admission::Admitted { step_number } => step_number,
                Admission::LimitExceeded {
                    attempted,
                    max_steps,
                } => {
                    let marker = format!("step limit exceeded: {attempted}/{max_steps}");
                    let stop = LoopStop::StepLimitExceeded {
                        step: attempted,
                        max: max_steps,
                    };
                    return Ok(self.conclude(task_id, stop, steps_executed, Some(marker)));
                }
                Admission::Terminal(status) => {
                    let stop = LoopStop::Preempted { status };
                    return Ok(self.conclude(task_id, stop, steps_executed, None));
                }
            };

            self.control.set_phase(LoopPhase::Stepping);
            let ctx = StepContext::new(
                task_id.clone(),
                step_number,
                budget.max_steps(),
                self.monitor.token_recorder(),
            );
            let result = self.invoke_actor(&ctx);
            steps_executed += 1;

            let classification = classify_step(
                result.as_ref().map_err(String::as_str),
                step_number,
                budget,
                consecutive_failures,
            );
            self.monitor
                .finish_step(classification.success, classification.error.clone());
            for retry in &classification.retries {
                self.monitor.record_retry(retry.kind, &retry.reason);
            }
            consecutive_failures = classification.consecutive_failures;
            debug!(
                step = step_number,
                success = classification.success,
                consecutive_failures,
                remaining = budget.remaining_after(step_number),
                "step classified"
            );

            let mut report = StepReport {
                step_number,
                success: classification.success,
                completed: false,
                error: classification.error,
                retries: classification.retries,
                accepted: None,
                consecutive_failures,
            };

            let Ok(outcome) = result else {
                on_step(&report);
                continue;
            };
            if let Some(tokens) = outcome.tokens {
                self.monitor
                    .record_tokens(tokens.prompt_tokens, tokens.completion_tokens);
            }
            report.completed = outcome.completed;
            if !outcome.completed {
                on_step(&report);
                continue;
            }

            if self.config.validate_output && !budget.is_final(step_number) {
                let verdict = self.invoke_validator(&ctx);
                report.accepted = Some(matches!(verdict, Ok(true)));
                debug!(step = step_number, accepted = ?report.accepted, "output validated");
                let verdict = verdict.as_ref().copied().map_err(String::as_str);
                if let Some(retry) = classify_validation(verdict) {
                    self.monitor.record_retry(retry.kind, &retry.reason);
                    report.retries.push(retry);
                    on_step(&report);
                    continue;
                }
            }

            on_step(&report);
            return Ok(self.conclude(task_id, LoopStop::Completed, steps_executed, None));
        }

        let stop = LoopStop::MaxStepsReached {
            max: budget.max_steps(),
        };
        Ok(self.conclude(
            task_id,
            stop,
            steps_executed,
            Some(EXHAUSTED_MARKER.to_string()),
        ))
    }

    fn check_setup(&self) -> Result<()> {
        self.config.validate()?;
        if self.config.validate_output && self.validator.is_none() {
            bail!("validate_output is enabled but no validator was provided");
        }
        let monitor_max = self.monitor.max_steps();
        if monitor_max != self.config.max_steps {
            bail!(
                "monitor max_steps ({monitor_max}) does not match loop max_steps ({})",
                self.config.max_steps
            );
        }
        let status = self.monitor.status();
        if status.is_terminal() {
            return Err(anyhow!(
                "run {} already finished with status {status}",
                self.monitor.task_id()
            ));
        }
        Ok(())
    }

    /// Between-step checks: abort, stop, failure threshold, then pause.
    fn check_controls(&self, consecutive_failures: u32) -> Option<LoopStop> {
        if self.control.is_aborted() {
            return Some(LoopStop::Aborted);
        }
        if self.control.is_stopped() {
            return Some(LoopStop::Cancelled);
        }
        if consecutive_failures >= self.config.max_failures {
            return Some(LoopStop::TooManyFailures {
                consecutive: consecutive_failures,
                max: self.config.max_failures,
            });
        }
        if !self.control.is_paused() {
            return None;
        }

        self.control.set_phase(LoopPhase::Paused);
        info!(step = self.monitor.current_step(), "run paused");
        match self.control.wait_while_paused(self.config.pause_poll_interval) {
            PauseOutcome::Resumed => {
                info!("run resumed");
                self.control.set_phase(LoopPhase::Running);
                None
            }
            PauseOutcome::Stopped => Some(LoopStop::Cancelled),
            PauseOutcome::Aborted => Some(LoopStop::Aborted),
        }
    }

    fn invoke_actor(&mut self, ctx: &StepContext) -> Result<StepOutcome, String> {
        let actor = &mut *self.actor;
        match catch_unwind(AssertUnwindSafe(|| actor.perform_step(ctx))) {
            Ok(Ok(outcome)) if outcome.failure_delta > self.config.max_failure_delta => {
                let message = format!(
                    "actor reported failure_delta {} above limit {}",
                    outcome.failure_delta, self.config.max_failure_delta
                );
                warn!(step = ctx.step_number, error = %message, "step outcome rejected");
                Err(message)
            }
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => {
                let message = format!("{err:#}");
                warn!(step = ctx.step_number, error = %message, "step failed");
                Err(message)
            }
            Err(payload) => {
                let message = format!("actor panicked: {}", panic_message(payload.as_ref()));
                warn!(step = ctx.step_number, error = %message, "step panicked");
                Err(message)
            }
        }
    }

    fn invoke_validator(&mut self, ctx: &StepContext) -> Result<bool, String> {
        let Some(validator) = self.validator.as_deref_mut() else {
            return Ok(true);
        };
        match catch_unwind(AssertUnwindSafe(|| validator.validate(ctx))) {
            Ok(Ok(accepted)) => Ok(accepted),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(payload) => Err(format!(
                "validator panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    fn conclude(
        &self,
        task_id: String,
        stop: LoopStop,
        steps_executed: u32,
        marker: Option<String>,
    ) -> LoopOutcome {
        if stop == LoopStop::Cancelled {
            self.control.set_phase(LoopPhase::Stopping);
        }
        if let Some(status) = stop.status() {
            self.monitor.finish(status);
        }
        match &stop {
            LoopStop::Aborted => warn!(task_id = %task_id, "run aborted; monitor left running"),
            LoopStop::Preempted { status } => {
                warn!(task_id = %task_id, %status, "run finished by another caller");
            }
            _ => debug!(task_id = %task_id, stop = ?stop, marker = ?marker, "loop stopped"),
        }
        self.control.set_phase(LoopPhase::Terminal);

        LoopOutcome {
            task_id,
            status: self.monitor.status(),
            steps_executed,
            stop,
            marker,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RetryKind;
    use crate::test_support::{ScriptedActor, ScriptedStep, ScriptedValidator};

    fn config(max_steps: u32) -> LoopConfig {
        LoopConfig {
            max_steps,
            pause_poll_interval: Duration::from_millis(10),
            ..LoopConfig::default()
        }
    }

    fn run(
        actor: &mut ScriptedActor,
        monitor: &ExecutionMonitor,
        config: LoopConfig,
    ) -> LoopOutcome {
        RunController::new(actor, monitor.clone(), RunControl::new(), config)
            .run(|_| {})
            .expect("run")
    }

    #[test]
    fn completion_finishes_with_success() {
        let monitor = ExecutionMonitor::new(3, None);
        let mut actor = ScriptedActor::new(vec![
            ScriptedStep::outcome(StepOutcome::in_progress()),
            ScriptedStep::outcome(StepOutcome::completed()),
        ]);
        let outcome = run(&mut actor, &monitor, config(3));

        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(outcome.marker, None);
        actor.assert_drained();
    }

    #[test]
    fn exhaustion_fails_with_marker() {
        let monitor = ExecutionMonitor::new(2, None);
        let mut actor = ScriptedActor::repeating(StepOutcome::in_progress());
        let outcome = run(&mut actor, &monitor, config(2));

        assert_eq!(outcome.stop, LoopStop::MaxStepsReached { max: 2 });
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.marker.as_deref(), Some(EXHAUSTED_MARKER));
        assert_eq!(monitor.current_step(), 2);
    }

    #[test]
    fn panicking_actor_is_a_failed_step() {
        let monitor = ExecutionMonitor::new(3, None);
        let mut actor = ScriptedActor::new(vec![
            ScriptedStep::panic("driver crashed"),
            ScriptedStep::outcome(StepOutcome::completed()),
        ]);
        let outcome = run(&mut actor, &monitor, config(3));

        assert_eq!(outcome.status, ExecutionStatus::Success);
        let summary = monitor.summary();
        assert!(!summary.steps[0].success);
        assert_eq!(
            summary.steps[0].error.as_deref(),
            Some("actor panicked: driver crashed")
        );
        assert_eq!(summary.retries.system_retry_count, 1);
    }

    #[test]
    fn tokens_on_outcome_are_recorded() {
        let monitor = ExecutionMonitor::new(2, None);
        let mut actor = ScriptedActor::new(vec![ScriptedStep::outcome(
            StepOutcome::completed().with_tokens(30, 12),
        )]);
        run(&mut actor, &monitor, config(2));
        assert_eq!(monitor.tokens().total_tokens, 42);
    }

    #[test]
    fn oversized_failure_delta_fails_the_step() {
        let monitor = ExecutionMonitor::new(3, None);
        let mut actor = ScriptedActor::new(vec![
            ScriptedStep::outcome(StepOutcome::in_progress().with_failures(u32::MAX)),
            ScriptedStep::outcome(StepOutcome::completed().with_failures(4)),
        ]);
        let config = LoopConfig {
            max_failure_delta: 4,
            max_failures: 10,
            ..config(3)
        };
        let outcome = run(&mut actor, &monitor, config);

        assert_eq!(outcome.status, ExecutionStatus::Success);
        let summary = monitor.summary();
        assert!(!summary.steps[0].success);
        assert_eq!(
            summary.steps[0].error.as_deref(),
            Some("actor reported failure_delta 4294967295 above limit 4")
        );
        // One retry for the rejected step, then one per unit of an accepted delta.
        assert_eq!(summary.retries.system_retry_count, 5);
    }

    #[test]
    fn final_step_error_records_no_retry() {
        let monitor = ExecutionMonitor::new(1, None);
        let mut actor = ScriptedActor::new(vec![ScriptedStep::error("timeout")]);
        let outcome = run(&mut actor, &monitor, config(1));

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(monitor.summary().retries.total_retry_count, 0);
    }

    #[test]
    fn final_step_skips_validation() {
        let monitor = ExecutionMonitor::new(1, None);
        let mut actor = ScriptedActor::new(vec![ScriptedStep::outcome(StepOutcome::completed())]);
        let mut validator = ScriptedValidator::new(vec![Ok(false)]);
        let outcome = RunController::new(
            &mut actor,
            monitor.clone(),
            RunControl::new(),
            LoopConfig {
                validate_output: true,
                ..config(1)
            },
        )
        .with_validator(&mut validator)
        .run(|_| {})
        .expect("run");

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(validator.calls(), 0);
    }

    #[test]
    fn validator_error_is_business_retry_with_message() {
        let monitor = ExecutionMonitor::new(3, None);
        let mut actor = ScriptedActor::repeating(StepOutcome::completed());
        let mut validator =
            ScriptedValidator::new(vec![Err("judge unavailable".to_string()), Ok(true)]);
        let mut reports = Vec::new();
        let outcome = RunController::new(
            &mut actor,
            monitor.clone(),
            RunControl::new(),
            LoopConfig {
                validate_output: true,
                ..config(3)
            },
        )
        .with_validator(&mut validator)
        .run(|report| reports.push(report.clone()))
        .expect("run");

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].accepted, Some(false));
        assert_eq!(reports[0].retries[0].kind, RetryKind::Business);
        assert_eq!(
            reports[0].retries[0].reason,
            "output validation failed: judge unavailable"
        );
        assert_eq!(reports[1].accepted, Some(true));
    }

    #[test]
    fn setup_errors_are_reported_before_any_step() {
        let monitor = ExecutionMonitor::new(3, None);
        let mut actor = ScriptedActor::new(Vec::new());

        let err = RunController::new(&mut actor, monitor.clone(), RunControl::new(), config(4))
            .run(|_| {})
            .expect_err("mismatch");
        assert!(err.to_string().contains("does not match"));

        let err = RunController::new(
            &mut actor,
            monitor.clone(),
            RunControl::new(),
            LoopConfig {
                validate_output: true,
                ..config(3)
            },
        )
        .run(|_| {})
        .expect_err("no validator");
        assert!(err.to_string().contains("no validator"));

        monitor.finish(ExecutionStatus::Cancelled);
        let err = RunController::new(&mut actor, monitor.clone(), RunControl::new(), config(3))
            .run(|_| {})
            .expect_err("terminal");
        assert!(err.to_string().contains("already finished"));
        assert_eq!(monitor.current_step(), 0);
    }

    #[test]
    fn breaker_trips_when_monitor_already_used_its_steps() {
        let monitor = ExecutionMonitor::new(2, None);
        for label in ["warmup_a", "warmup_b"] {
            assert!(monitor.start_step(label));
            monitor.finish_step(true, None);
        }
        let mut actor = ScriptedActor::new(Vec::new());
        let outcome = run(&mut actor, &monitor, config(2));

        assert_eq!(outcome.stop, LoopStop::StepLimitExceeded { step: 3, max: 2 });
        assert_eq!(outcome.status, ExecutionStatus::StepLimitExceeded);
        assert_eq!(outcome.marker.as_deref(), Some("step limit exceeded: 3/2"));
        assert_eq!(outcome.steps_executed, 0);
        assert_eq!(monitor.summary().steps.len(), 2);
    }

    #[test]
    fn phase_is_terminal_after_return() {
        let monitor = ExecutionMonitor::new(1, None);
        let control = RunControl::new();
        let mut actor = ScriptedActor::new(vec![ScriptedStep::outcome(StepOutcome::completed())]);
        RunController::new(&mut actor, monitor, control.clone(), config(1))
            .run(|_| {})
            .expect("run");
        assert_eq!(control.phase(), LoopPhase::Terminal);
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}

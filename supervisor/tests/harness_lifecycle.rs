//! Loop-level harness tests for full supervised-run scenarios.
//!
//! These tests drive `RunController` with scripted actors and validators and
//! check the monitor's final summary: status, step count, step records, and
//! retry bookkeeping.

use std::thread;
use std::time::{Duration, Instant};

use supervisor::control::{LoopPhase, RunControl, SignalAction};
use supervisor::core::types::{ExecutionStatus, RetryKind, StepOutcome};
use supervisor::exit_codes;
use supervisor::looping::{LoopConfig, LoopOutcome, LoopStop, RunController, StepReport};
use supervisor::monitor::ExecutionMonitor;
use supervisor::test_support::{ScriptedActor, ScriptedStep, ScriptedValidator};

fn loop_config(max_steps: u32) -> LoopConfig {
    LoopConfig {
        max_steps,
        pause_poll_interval: Duration::from_millis(10),
        ..LoopConfig::default()
    }
}

fn run_plain(
    actor: &mut ScriptedActor,
    monitor: &ExecutionMonitor,
    config: LoopConfig,
) -> LoopOutcome {
    RunController::new(actor, monitor.clone(), RunControl::new(), config)
        .run(|_| {})
        .expect("run")
}

fn run_validated(
    actor: &mut ScriptedActor,
    validator: &mut ScriptedValidator,
    monitor: &ExecutionMonitor,
    max_steps: u32,
) -> LoopOutcome {
    let config = LoopConfig {
        validate_output: true,
        ..loop_config(max_steps)
    };
    RunController::new(actor, monitor.clone(), RunControl::new(), config)
        .with_validator(validator)
        .run(|_| {})
        .expect("run")
}

/// Block until the loop reports `phase`, failing after a generous deadline.
fn wait_for_phase(control: &RunControl, phase: LoopPhase) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while control.phase() != phase {
        assert!(Instant::now() < deadline, "loop never reached phase {phase}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Completion on the final step of three succeeds; the final step is not validated.
#[test]
fn completion_on_final_step_succeeds() {
    let monitor = ExecutionMonitor::new(3, Some("scenario-a".to_string()));
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress()),
        ScriptedStep::outcome(StepOutcome::in_progress()),
        ScriptedStep::outcome(StepOutcome::completed()),
    ]);
    let mut validator = ScriptedValidator::new(Vec::new());

    let outcome = run_validated(&mut actor, &mut validator, &monitor, 3);

    assert_eq!(outcome.stop, LoopStop::Completed);
    let summary = monitor.summary();
    assert_eq!(summary.status, ExecutionStatus::Success);
    assert_eq!(summary.execution.current_step, 3);
    assert_eq!(summary.steps.len(), 3);
    assert!(summary.steps.iter().all(|step| step.success));
    assert!(summary.execution.end_time.is_some());
    assert_eq!(validator.calls(), 0);
    actor.assert_drained();
}

#[test]
fn never_completing_run_fails_at_budget() {
    let monitor = ExecutionMonitor::new(3, None);
    let mut actor = ScriptedActor::repeating(StepOutcome::in_progress());

    let outcome = run_plain(&mut actor, &monitor, loop_config(3));

    assert_eq!(outcome.stop, LoopStop::MaxStepsReached { max: 3 });
    assert_eq!(
        outcome.marker.as_deref(),
        Some("failed to complete task in maximum steps")
    );
    assert_eq!(monitor.status(), ExecutionStatus::Failed);
    assert_eq!(monitor.current_step(), 3);
    assert_eq!(exit_codes::for_outcome(&outcome), exit_codes::FAILED);
}

#[test]
fn error_then_completion_records_one_system_retry() {
    let monitor = ExecutionMonitor::new(2, None);
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::error("element not found"),
        ScriptedStep::outcome(StepOutcome::completed()),
    ]);

    let outcome = run_plain(&mut actor, &monitor, loop_config(2));

    assert_eq!(outcome.status, ExecutionStatus::Success);
    let summary = monitor.summary();
    assert_eq!(summary.retries.system_retry_count, 1);
    assert_eq!(summary.retries.business_retry_count, 0);
    assert_eq!(summary.retries.detail[0].step, 1);
    assert_eq!(
        summary.retries.detail[0].reason,
        "step exception: element not found"
    );
    assert!(!summary.steps[0].success);
    assert_eq!(summary.steps[0].error.as_deref(), Some("element not found"));
    assert!(summary.steps[1].success);
}

/// A stop pressed while step 2 of 5 is in flight lets the step finish, then cancels.
#[test]
fn stop_during_step_cancels_after_it() {
    let monitor = ExecutionMonitor::new(5, None);
    let control = RunControl::new();
    let stopper = control.clone();
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress()),
        ScriptedStep::outcome(StepOutcome::in_progress()).with_hook(move |_| stopper.stop()),
        ScriptedStep::outcome(StepOutcome::completed()),
    ]);

    let outcome = RunController::new(&mut actor, monitor.clone(), control, loop_config(5))
        .run(|_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::Cancelled);
    assert_eq!(outcome.status, ExecutionStatus::Cancelled);
    assert!(monitor.current_step() <= 2);
    assert_eq!(actor.seen_steps(), &[1, 2]);
    let summary = monitor.summary();
    assert_eq!(summary.steps.len(), 2);
    assert!(summary.steps.iter().all(|step| step.success));
    assert_eq!(exit_codes::for_outcome(&outcome), exit_codes::CANCELLED);
}

#[test]
fn rejected_output_is_business_retry_then_success() {
    let monitor = ExecutionMonitor::new(3, None);
    let mut actor = ScriptedActor::repeating(StepOutcome::completed());
    let mut validator = ScriptedValidator::new(vec![Ok(false), Ok(true)]);

    let outcome = run_validated(&mut actor, &mut validator, &monitor, 3);

    assert_eq!(outcome.status, ExecutionStatus::Success);
    let summary = monitor.summary();
    assert_eq!(summary.execution.current_step, 2);
    assert_eq!(summary.retries.business_retry_count, 1);
    assert_eq!(summary.retries.system_retry_count, 0);
    assert_eq!(summary.retries.detail[0].kind, RetryKind::Business);
    assert_eq!(summary.retries.detail[0].reason, "output validation failed");
    assert_eq!(validator.calls(), 2);
}

#[test]
fn consecutive_failures_stop_before_next_step() {
    let monitor = ExecutionMonitor::new(10, None);
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::error("timeout"),
        ScriptedStep::error("timeout"),
    ]);
    let config = LoopConfig {
        max_failures: 2,
        ..loop_config(10)
    };

    let outcome = run_plain(&mut actor, &monitor, config);

    assert_eq!(
        outcome.stop,
        LoopStop::TooManyFailures {
            consecutive: 2,
            max: 2
        }
    );
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(monitor.current_step(), 2);
    assert_eq!(monitor.summary().retries.system_retry_count, 2);
    actor.assert_drained();
}

#[test]
fn clean_step_resets_failure_streak() {
    let monitor = ExecutionMonitor::new(10, None);
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::error("flaky"),
        ScriptedStep::outcome(StepOutcome::in_progress()),
        ScriptedStep::error("flaky"),
        ScriptedStep::outcome(StepOutcome::completed()),
    ]);
    let config = LoopConfig {
        max_failures: 2,
        ..loop_config(10)
    };
    let mut streaks = Vec::new();

    let outcome = RunController::new(&mut actor, monitor.clone(), RunControl::new(), config)
        .run(|report: &StepReport| streaks.push(report.consecutive_failures))
        .expect("run");

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(streaks, vec![1, 0, 1, 0]);
}

#[test]
fn absorbed_failures_record_one_retry_per_unit() {
    let monitor = ExecutionMonitor::new(4, None);
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress().with_failures(2)),
        ScriptedStep::outcome(StepOutcome::completed()),
    ]);
    let config = LoopConfig {
        max_failures: 5,
        ..loop_config(4)
    };

    let outcome = run_plain(&mut actor, &monitor, config);

    assert_eq!(outcome.status, ExecutionStatus::Success);
    let summary = monitor.summary();
    assert_eq!(summary.retries.system_retry_count, 2);
    assert!(
        summary
            .retries
            .detail
            .iter()
            .all(|retry| retry.reason == "action execution failed (failure #2)" && retry.step == 1)
    );
    assert!(summary.steps[0].success);
}

/// Absorbed failures alone push the streak to the threshold.
#[test]
fn absorbed_failures_reach_failure_threshold() {
    let monitor = ExecutionMonitor::new(10, None);
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress().with_failures(2)),
        ScriptedStep::outcome(StepOutcome::in_progress().with_failures(1)),
    ]);
    let config = LoopConfig {
        max_failures: 3,
        ..loop_config(10)
    };

    let outcome = run_plain(&mut actor, &monitor, config);

    assert_eq!(
        outcome.stop,
        LoopStop::TooManyFailures {
            consecutive: 3,
            max: 3
        }
    );
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(monitor.current_step(), 2);
    let summary = monitor.summary();
    assert!(summary.steps.iter().all(|step| step.success));
    assert_eq!(summary.retries.system_retry_count, 3);
    actor.assert_drained();
}

#[test]
fn pause_blocks_until_resume() {
    let monitor = ExecutionMonitor::new(3, None);
    let control = RunControl::new();
    let pauser = control.clone();
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress()).with_hook(move |_| pauser.pause()),
        ScriptedStep::outcome(StepOutcome::completed()),
    ]);

    let remote = control.clone();
    let observer = monitor.clone();
    let resumer = thread::spawn(move || {
        wait_for_phase(&remote, LoopPhase::Paused);
        // No step runs while paused.
        let paused_at = observer.current_step();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(observer.current_step(), paused_at);
        assert!(remote.resume());
        paused_at
    });

    let outcome = RunController::new(&mut actor, monitor.clone(), control.clone(), loop_config(3))
        .run(|_| {})
        .expect("run");

    assert_eq!(resumer.join().expect("resumer thread"), 1);
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(monitor.current_step(), 2);
    assert!(!control.is_paused());
    assert_eq!(control.phase(), LoopPhase::Terminal);
}

#[test]
fn stop_while_paused_cancels() {
    let monitor = ExecutionMonitor::new(3, None);
    let control = RunControl::new();
    let pauser = control.clone();
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress()).with_hook(move |_| pauser.pause()),
    ]);

    let remote = control.clone();
    let stopper = thread::spawn(move || {
        wait_for_phase(&remote, LoopPhase::Paused);
        remote.stop();
    });

    let outcome = RunController::new(&mut actor, monitor.clone(), control, loop_config(3))
        .run(|_| {})
        .expect("run");
    stopper.join().expect("stopper thread");

    assert_eq!(outcome.stop, LoopStop::Cancelled);
    assert_eq!(monitor.status(), ExecutionStatus::Cancelled);
    assert_eq!(monitor.current_step(), 1);
}

#[test]
fn second_interrupt_abandons_run_without_finishing() {
    let monitor = ExecutionMonitor::new(3, None);
    let control = RunControl::new();
    let interrupter = control.clone();
    let mut actor = ScriptedActor::new(vec![
        ScriptedStep::outcome(StepOutcome::in_progress()).with_hook(move |_| {
            assert_eq!(interrupter.interrupt(), SignalAction::Pause);
        }),
    ]);

    let remote = control.clone();
    let second = thread::spawn(move || {
        wait_for_phase(&remote, LoopPhase::Paused);
        remote.interrupt()
    });

    let outcome = RunController::new(&mut actor, monitor.clone(), control, loop_config(3))
        .run(|_| {})
        .expect("run");

    assert_eq!(second.join().expect("interrupt thread"), SignalAction::ForceExit);
    assert_eq!(outcome.stop, LoopStop::Aborted);
    assert_eq!(outcome.status, ExecutionStatus::Running);
    assert_eq!(exit_codes::for_outcome(&outcome), exit_codes::ABORTED);
    let summary = monitor.summary();
    assert_eq!(summary.status, ExecutionStatus::Running);
    assert!(summary.execution.end_time.is_none());
    assert_eq!(summary.steps.len(), 1);
}

#[test]
fn observers_read_consistent_summaries_during_run() {
    let monitor = ExecutionMonitor::new(40, None);
    let control = RunControl::new();
    let mut actor = ScriptedActor::new(
        (0..39)
            .map(|i| {
                if i % 3 == 0 {
                    ScriptedStep::error("flaky")
                } else {
                    ScriptedStep::outcome(StepOutcome::in_progress().with_tokens(10, 5))
                }
            })
            .chain(std::iter::once(ScriptedStep::outcome(StepOutcome::completed())))
            .collect(),
    );
    let config = LoopConfig {
        max_failures: 40,
        ..loop_config(40)
    };

    let reader = monitor.clone();
    let watcher = control.clone();
    let observer = thread::spawn(move || {
        while watcher.phase() != LoopPhase::Terminal {
            let summary = reader.summary();
            assert_eq!(
                summary.tokens.total_tokens,
                summary.tokens.prompt_tokens + summary.tokens.completion_tokens
            );
            assert_eq!(
                summary.retries.total_retry_count as usize,
                summary.retries.detail.len()
            );
            assert!(summary.execution.current_step <= summary.execution.max_steps);
            thread::sleep(Duration::from_millis(1));
        }
    });

    let outcome = RunController::new(&mut actor, monitor.clone(), control, config)
        .run(|_| {})
        .expect("run");
    observer.join().expect("observer thread");

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(monitor.summary().steps.len(), 40);
}

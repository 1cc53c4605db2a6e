//! Actor abstraction: the collaborator that performs one step.
//!
//! The [`StepActor`] trait decouples the loop from whatever decides and carries
//! out actions (an LLM-driven planner, a browser driver). Tests use scripted
//! actors; the CLI uses [`CommandActor`], which runs one child process per step.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::StepOutcome;
use crate::io::config::ActorConfig;
use crate::io::process::run_with_timeout;
use crate::monitor::TokenRecorder;

/// Environment variables passed to command collaborators.
pub const ENV_TASK_ID: &str = "SUPERVISOR_TASK_ID";
pub const ENV_STEP: &str = "SUPERVISOR_STEP";
pub const ENV_MAX_STEPS: &str = "SUPERVISOR_MAX_STEPS";

/// Per-step information handed to collaborators.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub task_id: String,
    /// 1-based step number.
    pub step_number: u32,
    pub max_steps: u32,
    tokens: TokenRecorder,
}

impl StepContext {
    pub fn new(task_id: String, step_number: u32, max_steps: u32, tokens: TokenRecorder) -> Self {
        Self {
            task_id,
            step_number,
            max_steps,
            tokens,
        }
    }

    /// Report model usage as it happens.
    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.tokens.record(prompt, completion);
    }

    pub(crate) fn apply_env(&self, cmd: &mut Command) {
        cmd.env(ENV_TASK_ID, &self.task_id)
            .env(ENV_STEP, self.step_number.to_string())
            .env(ENV_MAX_STEPS, self.max_steps.to_string());
    }
}

/// Performs one step of the supervised task.
///
/// `Err` means the step terminated abnormally; the loop records it and moves on.
pub trait StepActor {
    fn perform_step(&mut self, ctx: &StepContext) -> Result<StepOutcome>;
}

impl<F> StepActor for F
where
    F: FnMut(&StepContext) -> Result<StepOutcome>,
{
    fn perform_step(&mut self, ctx: &StepContext) -> Result<StepOutcome> {
        self(ctx)
    }
}

/// JSON object a command actor prints on stdout.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActorReport {
    pub completed: bool,
    pub failure_delta: u32,
    pub error: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ActorReport {
    /// Convert to a step outcome; a reported `error` is an abnormal termination.
    pub fn into_outcome(self) -> Result<StepOutcome> {
        if let Some(error) = self.error {
            return Err(anyhow!(error));
        }
        let mut outcome = StepOutcome {
            completed: self.completed,
            failure_delta: self.failure_delta,
            tokens: None,
        };
        if self.prompt_tokens > 0 || self.completion_tokens > 0 {
            outcome = outcome.with_tokens(self.prompt_tokens, self.completion_tokens);
        }
        Ok(outcome)
    }
}

/// Actor that spawns a command for every step and parses its JSON report.
#[derive(Debug, Clone)]
pub struct CommandActor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandActor {
    pub fn from_config(config: &ActorConfig) -> Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            bail!("actor.command must be a non-empty array");
        };
        if program.trim().is_empty() {
            bail!("actor.command must name a program");
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl StepActor for CommandActor {
    #[instrument(skip_all, fields(step = ctx.step_number, program = %self.program))]
    fn perform_step(&mut self, ctx: &StepContext) -> Result<StepOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        ctx.apply_env(&mut cmd);

        let output = run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .context("run actor command")?;
        if !output.succeeded() {
            warn!(exit = %output.describe_exit(self.timeout), "actor command failed");
            return Err(anyhow!(
                "actor command {}",
                output.describe_exit(self.timeout)
            ));
        }

        let report = parse_report(&output.stdout_lossy())?;
        debug!(completed = report.completed, failure_delta = report.failure_delta, "actor report parsed");
        report.into_outcome()
    }
}

/// Parse the report from the last non-empty stdout line.
///
/// Actors may log freely before the final line.
pub fn parse_report(stdout: &str) -> Result<ActorReport> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("actor printed no report"))?;
    serde_json::from_str(line).with_context(|| format!("parse actor report {line:?}"))
}

//! Output validation run when the actor claims the task is complete.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::io::actor::StepContext;
use crate::io::config::ValidatorConfig;
use crate::io::process::run_with_timeout;

/// Judges whether a completed task's output is acceptable.
///
/// `Ok(false)` and `Err` are both rejections; an error's message is kept in
/// the retry reason.
pub trait OutputValidator {
    fn validate(&mut self, ctx: &StepContext) -> Result<bool>;
}

/// Validator backed by a command: exit status 0 accepts.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandValidator {
    pub fn from_config(config: &ValidatorConfig) -> Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            bail!("validator.command must be a non-empty array");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl OutputValidator for CommandValidator {
    #[instrument(skip_all, fields(step = ctx.step_number, program = %self.program))]
    fn validate(&mut self, ctx: &StepContext) -> Result<bool> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        ctx.apply_env(&mut cmd);

        let output = run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .context("run validator command")?;
        if output.succeeded() {
            debug!("validator accepted output");
            return Ok(true);
        }
        info!(exit = %output.describe_exit(self.timeout), "validator rejected output");
        Ok(false)
    }
}

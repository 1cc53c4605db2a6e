//! Supervisor configuration stored in `supervisor.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "supervisor.toml";

/// Supervisor configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Step ceiling for one run (the circuit breaker).
    pub max_steps: u32,

    /// Consecutive actor failures that abort the run.
    pub max_failures: u32,

    /// Run the validator when the actor reports completion.
    pub validate_output: bool,

    /// Upper bound between re-checks of the control flags while paused.
    pub pause_poll_interval_ms: u64,

    pub actor: ActorConfig,

    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActorConfig {
    /// Command run once per step (e.g. `["python","agent_step.py"]`).
    pub command: Vec<String>,
    /// Per-invocation limit enforced by the command adapter, not the loop.
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Largest `failure_delta` accepted from one step. Larger reports fail the step.
    pub max_failure_delta: u32,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
            max_failure_delta: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Command whose exit status judges completed output. Empty disables validation.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_failures: 3,
            validate_output: false,
            pause_poll_interval_ms: 200,
            actor: ActorConfig::default(),
            validator: ValidatorConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.max_failures == 0 {
            return Err(anyhow!("max_failures must be > 0"));
        }
        if self.pause_poll_interval_ms == 0 {
            return Err(anyhow!("pause_poll_interval_ms must be > 0"));
        }
        if self.actor.timeout_secs == 0 {
            return Err(anyhow!("actor.timeout_secs must be > 0"));
        }
        if self.actor.output_limit_bytes == 0 {
            return Err(anyhow!("actor.output_limit_bytes must be > 0"));
        }
        if self.actor.max_failure_delta == 0 {
            return Err(anyhow!("actor.max_failure_delta must be > 0"));
        }
        if self.validator.timeout_secs == 0 {
            return Err(anyhow!("validator.timeout_secs must be > 0"));
        }
        if self.validator.output_limit_bytes == 0 {
            return Err(anyhow!("validator.output_limit_bytes must be > 0"));
        }
        if self.validate_output && !has_program(&self.validator.command) {
            return Err(anyhow!(
                "validate_output requires validator.command to be a non-empty array"
            ));
        }
        Ok(())
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }
}

fn has_program(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub max_steps: Option<u32>,
    pub max_failures: Option<u32>,
    pub validate_output: Option<bool>,
    pub actor_command: Option<Vec<String>>,
    pub validator_command: Option<Vec<String>>,
}

/// Apply overrides to a loaded config, then re-validate.
pub fn apply_overrides(
    mut base: SupervisorConfig,
    overrides: &ConfigOverrides,
) -> Result<SupervisorConfig> {
    if let Some(max_steps) = overrides.max_steps {
        base.max_steps = max_steps;
    }
    if let Some(max_failures) = overrides.max_failures {
        base.max_failures = max_failures;
    }
    if let Some(validate_output) = overrides.validate_output {
        base.validate_output = validate_output;
    }
    if let Some(command) = &overrides.actor_command {
        base.actor.command = command.clone();
    }
    if let Some(command) = &overrides.validator_command {
        base.validator.command = command.clone();
    }
    base.validate()?;
    Ok(base)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SupervisorConfig::default()`.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if !path.exists() {
        let cfg = SupervisorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SupervisorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SupervisorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

//! Scripted collaborators for driving the loop in tests.

use std::collections::VecDeque;

use anyhow::{Result, anyhow};

use crate::core::types::StepOutcome;
use crate::io::actor::{StepActor, StepContext};
use crate::io::validator::OutputValidator;

enum ScriptedResult {
    Outcome(StepOutcome),
    Error(String),
    Panic(String),
}

/// One scripted actor invocation.
pub struct ScriptedStep {
    result: ScriptedResult,
    hook: Option<Box<dyn FnOnce(&StepContext) + Send>>,
}

impl ScriptedStep {
    pub fn outcome(outcome: StepOutcome) -> Self {
        Self {
            result: ScriptedResult::Outcome(outcome),
            hook: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            result: ScriptedResult::Error(message.to_string()),
            hook: None,
        }
    }

    pub fn panic(message: &str) -> Self {
        Self {
            result: ScriptedResult::Panic(message.to_string()),
            hook: None,
        }
    }

    /// Run `hook` inside the step, before it returns (e.g. to press stop mid-step).
    pub fn with_hook(mut self, hook: impl FnOnce(&StepContext) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }
}

/// Actor that replays a fixed script, then either repeats a fallback or errors.
pub struct ScriptedActor {
    steps: VecDeque<ScriptedStep>,
    fallback: Option<StepOutcome>,
    seen: Vec<u32>,
}

impl ScriptedActor {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: steps.into(),
            fallback: None,
            seen: Vec::new(),
        }
    }

    /// Actor that returns `outcome` on every step.
    pub fn repeating(outcome: StepOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Self::new(Vec::new())
        }
    }

    /// Step numbers the actor was invoked with, in order.
    pub fn seen_steps(&self) -> &[u32] {
        &self.seen
    }

    pub fn assert_drained(&self) {
        assert!(
            self.steps.is_empty(),
            "scripted actor has {} unused steps",
            self.steps.len()
        );
    }
}

impl StepActor for ScriptedActor {
    fn perform_step(&mut self, ctx: &StepContext) -> Result<StepOutcome> {
        self.seen.push(ctx.step_number);
        let Some(step) = self.steps.pop_front() else {
            return match &self.fallback {
                Some(outcome) => Ok(outcome.clone()),
                None => Err(anyhow!("scripted actor exhausted at step {}", ctx.step_number)),
            };
        };
        if let Some(hook) = step.hook {
            hook(ctx);
        }
        match step.result {
            ScriptedResult::Outcome(outcome) => Ok(outcome),
            ScriptedResult::Error(message) => Err(anyhow!(message)),
            ScriptedResult::Panic(message) => panic!("{message}"),
        }
    }
}

/// Validator that replays verdicts; `Err` strings become validator errors.
pub struct ScriptedValidator {
    verdicts: VecDeque<Result<bool, String>>,
    calls: u32,
}

impl ScriptedValidator {
    pub fn new(verdicts: Vec<Result<bool, String>>) -> Self {
        Self {
            verdicts: verdicts.into(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }
}

impl OutputValidator for ScriptedValidator {
    fn validate(&mut self, _ctx: &StepContext) -> Result<bool> {
        self.calls += 1;
        match self.verdicts.pop_front() {
            Some(Ok(accepted)) => Ok(accepted),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted validator exhausted")),
        }
    }
}

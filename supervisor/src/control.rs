//! Cooperative pause/resume/stop control for a running loop.
//!
//! [`RunControl`] is shared between the loop and any number of external
//! controllers (console listener, signal handler, embedding application).
//! Controllers set flags; the loop polls them between steps and never
//! preempts a step in flight. The loop itself only ever clears `paused`, and
//! only when it consumes a `resume`.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What an external interrupt translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First interrupt: pause before the next step.
    Pause,
    /// Interrupt while already paused: abandon the run without finishing it.
    ForceExit,
    /// Interrupt after a forced exit was already requested.
    Ignore,
}

/// How a pause wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Resumed,
    Stopped,
    Aborted,
}

/// Observable loop phase, derived from the flags and the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Between steps.
    Running,
    /// Blocked waiting for resume or stop.
    Paused,
    /// A stop was observed; the run is being finished.
    Stopping,
    /// An actor invocation is in flight.
    Stepping,
    /// The loop has returned.
    Terminal,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Running => "running",
            LoopPhase::Paused => "paused",
            LoopPhase::Stopping => "stopping",
            LoopPhase::Stepping => "stepping",
            LoopPhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Flags {
    paused: bool,
    resume_requested: bool,
    stopped: bool,
    aborted: bool,
    phase: LoopPhase,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            paused: false,
            resume_requested: false,
            stopped: false,
            aborted: false,
            phase: LoopPhase::Running,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    flags: Mutex<Flags>,
    wake: Condvar,
}

/// Shared control handle. Clones refer to the same flags.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    shared: Arc<Shared>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.shared
            .flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a pause before the next step.
    pub fn pause(&self) {
        let mut flags = self.flags();
        flags.paused = true;
        flags.resume_requested = false;
    }

    /// Resume a paused run. Returns `false` (and does nothing) when not paused.
    pub fn resume(&self) -> bool {
        let mut flags = self.flags();
        if !flags.paused {
            return false;
        }
        flags.resume_requested = true;
        self.shared.wake.notify_all();
        true
    }

    /// Request cancellation. Wakes a paused loop.
    pub fn stop(&self) {
        let mut flags = self.flags();
        flags.stopped = true;
        self.shared.wake.notify_all();
    }

    /// Translate a process interrupt: pause first, abort if already paused.
    pub fn interrupt(&self) -> SignalAction {
        let mut flags = self.flags();
        if flags.aborted {
            return SignalAction::Ignore;
        }
        if flags.paused && !flags.resume_requested {
            flags.aborted = true;
            self.shared.wake.notify_all();
            return SignalAction::ForceExit;
        }
        flags.paused = true;
        flags.resume_requested = false;
        SignalAction::Pause
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.flags().stopped
    }

    pub fn is_aborted(&self) -> bool {
        self.flags().aborted
    }

    pub fn phase(&self) -> LoopPhase {
        self.flags().phase
    }

    pub(crate) fn set_phase(&self, phase: LoopPhase) {
        self.flags().phase = phase;
    }

    /// Block while paused, until resumed, stopped, or aborted.
    ///
    /// Wakes on every control call and re-checks at least every `poll_interval`.
    /// Returns immediately with `Resumed` when not paused.
    pub(crate) fn wait_while_paused(&self, poll_interval: Duration) -> PauseOutcome {
        let mut flags = self.flags();
        loop {
            if flags.aborted {
                return PauseOutcome::Aborted;
            }
            if flags.stopped {
                return PauseOutcome::Stopped;
            }
            if !flags.paused {
                return PauseOutcome::Resumed;
            }
            if flags.resume_requested {
                flags.paused = false;
                flags.resume_requested = false;
                return PauseOutcome::Resumed;
            }
            flags = match self.shared.wake.wait_timeout(flags, poll_interval) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

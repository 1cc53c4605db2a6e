//! Process interrupts and console commands wired to a [`RunControl`].
//!
//! First Ctrl-C pauses the run before its next step. A second Ctrl-C while
//! paused abandons the run without finishing it. While paused, the console
//! listener accepts Enter (resume) or `stop`.

use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::control::{RunControl, SignalAction};

pub const PAUSE_HINT: &str =
    "Paused after the current step. Press Enter to resume, type 'stop' to cancel, or Ctrl-C again to exit.";

/// Bind SIGINT to `control`. `on_force_exit` runs on the second interrupt.
///
/// Can be called once per process.
pub fn install<F>(control: RunControl, on_force_exit: F) -> Result<()>
where
    F: Fn() + Send + 'static,
{
    ctrlc::set_handler(move || match control.interrupt() {
        SignalAction::Pause => {
            eprintln!("\n{PAUSE_HINT}");
        }
        SignalAction::ForceExit => {
            eprintln!("\nReceived second interrupt, exiting immediately...");
            on_force_exit();
        }
        SignalAction::Ignore => {}
    })
    .context("install interrupt handler")
}

/// A line typed at the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Resume,
    Pause,
    Stop,
}

impl ConsoleCommand {
    /// Parse a console line. Unknown input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "" | "r" | "resume" => Some(ConsoleCommand::Resume),
            "p" | "pause" => Some(ConsoleCommand::Pause),
            "s" | "stop" | "q" | "quit" => Some(ConsoleCommand::Stop),
            _ => None,
        }
    }

    pub fn apply(self, control: &RunControl) {
        match self {
            ConsoleCommand::Resume => {
                if control.resume() {
                    info!("resume requested from console");
                }
            }
            ConsoleCommand::Pause => {
                control.pause();
                info!("pause requested from console");
            }
            ConsoleCommand::Stop => {
                control.stop();
                info!("stop requested from console");
            }
        }
    }
}

/// Read console commands from `input` on a background thread until EOF or stop.
pub fn spawn_console_listener<R>(control: RunControl, input: R) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else {
                break;
            };
            match ConsoleCommand::parse(&line) {
                Some(command) => {
                    command.apply(&control);
                    if command == ConsoleCommand::Stop {
                        break;
                    }
                }
                None => debug!(line = %line, "ignoring unknown console input"),
            }
        }
    })
}

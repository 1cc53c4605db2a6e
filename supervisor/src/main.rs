//! Step-execution supervisor CLI.
//!
//! Runs an actor command once per step until it reports completion, the step
//! budget runs out, or the user stops it, then prints the run summary.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Once};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};

use supervisor::control::RunControl;
use supervisor::exit_codes;
use supervisor::io::actor::CommandActor;
use supervisor::io::config::{
    ConfigOverrides, DEFAULT_CONFIG_FILE, SupervisorConfig, apply_overrides, load_config,
    write_config,
};
use supervisor::io::validator::CommandValidator;
use supervisor::logging;
use supervisor::looping::{LoopConfig, RunController, StepReport};
use supervisor::monitor::ExecutionMonitor;
use supervisor::signal;

#[derive(Parser)]
#[command(
    name = "supervisor",
    version,
    about = "Bounded, observable step-execution supervisor"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Supervise one run of the actor command.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    max_steps: Option<u32>,
    #[arg(long)]
    max_failures: Option<u32>,
    /// Identifier for the run (default: `task_<unix-secs>`).
    #[arg(long)]
    task_id: Option<String>,
    /// Validate output with `validator.command` when the actor completes.
    #[arg(long)]
    validate: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Actor command; overrides `actor.command`.
    #[arg(last = true)]
    actor: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Init { force, config } => cmd_init(&config, force).map(|()| exit_codes::OK),
        Command::Run(args) => cmd_run(args),
    };
    match code {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SupervisorConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let base = load_config(&args.config)?;
    let overrides = ConfigOverrides {
        max_steps: args.max_steps,
        max_failures: args.max_failures,
        validate_output: args.validate.then_some(true),
        actor_command: (!args.actor.is_empty()).then_some(args.actor),
        validator_command: None,
    };
    let config = apply_overrides(base, &overrides)?;

    let mut actor = CommandActor::from_config(&config.actor)?;
    let mut validator = if config.validate_output {
        Some(CommandValidator::from_config(&config.validator)?)
    } else {
        None
    };

    let monitor = ExecutionMonitor::new(config.max_steps, args.task_id);
    let control = RunControl::new();
    let printer = SummaryPrinter::new(monitor.clone(), args.format);

    let abandoned = printer.clone();
    signal::install(control.clone(), move || {
        match abandoned.print() {
            // The loop already returned and printed; let it exit.
            Ok(false) => return,
            Ok(true) => {}
            Err(err) => eprintln!("{err:#}"),
        }
        process::exit(exit_codes::ABORTED);
    })?;
    signal::spawn_console_listener(control.clone(), BufReader::new(io::stdin()));

    let mut controller = RunController::new(
        &mut actor,
        monitor.clone(),
        control,
        LoopConfig::from(&config),
    );
    if let Some(validator) = validator.as_mut() {
        controller = controller.with_validator(validator);
    }
    let outcome = controller.run(report_step)?;

    if let Some(marker) = &outcome.marker {
        eprintln!("{marker}");
    }
    printer.print()?;
    Ok(exit_codes::for_outcome(&outcome))
}

fn report_step(report: &StepReport) {
    if let Some(error) = &report.error {
        eprintln!("step {} failed: {error}", report.step_number);
    }
    if report.accepted == Some(false) {
        eprintln!("step {}: output rejected by validator", report.step_number);
    }
}

/// Prints the run summary at most once, whether from the loop's thread or the
/// force-exit handler.
#[derive(Clone)]
struct SummaryPrinter {
    monitor: ExecutionMonitor,
    format: OutputFormat,
    once: Arc<Once>,
}

impl SummaryPrinter {
    fn new(monitor: ExecutionMonitor, format: OutputFormat) -> Self {
        Self {
            monitor,
            format,
            once: Arc::new(Once::new()),
        }
    }

    /// Returns `Ok(false)` when another caller already printed.
    ///
    /// A concurrent caller blocks until the first print is flushed.
    fn print(&self) -> Result<bool> {
        let mut printed = Ok(false);
        self.once.call_once(|| {
            printed = self.render().map(|payload| {
                println!("{payload}");
                true
            });
        });
        printed
    }

    fn render(&self) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&self.monitor.summary()).context("serialize summary")
            }
            OutputFormat::Text => Ok(self.monitor.metrics_text()),
        }
    }
}

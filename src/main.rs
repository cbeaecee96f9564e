//! CLI entry point for the lab worklist runner.
//!
//! # Usage
//!
//! Run a saved worklist against the configured instruments:
//! ```bash
//! worklist run measurements/polarization.txt --config config/worklist.toml
//! ```
//!
//! Check a worklist file without touching hardware:
//! ```bash
//! worklist validate measurements/polarization.txt
//! ```
//!
//! Generate a rotator sweep:
//! ```bash
//! worklist sweep-angles --role analyzer --start 0 --stop 180 --step 15 --out sweep.txt
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lab_worklist::config::{WorklistConfig, DEFAULT_CONFIG_PATH};
use lab_worklist::experiment::run_engine::required_roles;
use lab_worklist::experiment::{sweeps, CommandQueue, RotatorModel, RotatorRole, RunEvent};
use lab_worklist::{logging, InstrumentsBuilder, QueueRunner};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "worklist")]
#[command(about = "Sequential command queue for lab instruments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a worklist file
    Run {
        /// Worklist file
        worklist: PathBuf,

        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Parse a worklist file and list the instruments it needs
    Validate {
        /// Worklist file
        worklist: PathBuf,

        /// Configuration file to check instrument roles against
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a rotator angle sweep as a worklist
    SweepAngles {
        /// Rotation mount to move
        #[arg(long, value_enum)]
        role: RoleArg,

        /// Mount vendor
        #[arg(long, value_enum, default_value = "thorlabs")]
        model: ModelArg,

        /// First angle in degrees
        #[arg(long)]
        start: f64,

        /// Last angle in degrees
        #[arg(long)]
        stop: f64,

        /// Step in degrees
        #[arg(long)]
        step: f64,

        /// Pause after each move in seconds
        #[arg(long, default_value_t = 0.0)]
        pause: f64,

        /// Output file (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Polarizer,
    Analyzer,
}

impl From<RoleArg> for RotatorRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Polarizer => RotatorRole::Polarizer,
            RoleArg::Analyzer => RotatorRole::Analyzer,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Thorlabs,
    Newport,
}

impl From<ModelArg> for RotatorModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Thorlabs => RotatorModel::Thorlabs,
            ModelArg::Newport => RotatorModel::Newport,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { worklist, config } => run_worklist(worklist, config).await,
        Commands::Validate { worklist, config } => validate_worklist(worklist, config).await,
        Commands::SweepAngles {
            role,
            model,
            start,
            stop,
            step,
            pause,
            out,
        } => {
            let commands = sweeps::angle_sweep(
                role.into(),
                model.into(),
                start,
                stop,
                step,
                Duration::try_from_secs_f64(pause).context("pause must be non-negative")?,
            )?;
            let text = CommandQueue::from_commands(commands)?.to_text();
            match out {
                Some(path) => tokio::fs::write(&path, text)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{}", text),
            }
            Ok(())
        }
    }
}

async fn read_worklist(path: &PathBuf) -> Result<CommandQueue> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    CommandQueue::from_text(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn run_worklist(worklist: PathBuf, config_path: PathBuf) -> Result<()> {
    let config = WorklistConfig::load_from(&config_path)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(config = %config_path.display(), "Configuration loaded");

    let instruments = InstrumentsBuilder::default().build(&config).await?;
    let runner = QueueRunner::new(instruments, config.runner.settings());
    let queue = read_worklist(&worklist).await?;
    runner.replace(queue.snapshot())?;

    let mut events = runner.subscribe();
    let mut handle = runner.run()?;

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RunEvent::CommandStarted { index, label } => println!("[{}] {}", index + 1, label),
                RunEvent::Progress { percent } => println!("    {}%", percent),
                RunEvent::CommandFailed { index, message, .. } => {
                    eprintln!("[{}] failed: {}", index + 1, message)
                }
                RunEvent::Finished { .. } => break,
                _ => {}
            }
        }
    });

    let report = tokio::select! {
        report = &mut handle => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; stopping after the current command");
            if let Err(err) = runner.stop() {
                warn!(error = %err, "Stop request ignored");
            }
            handle.await?
        }
    };
    let _ = printer.await;

    println!(
        "Run {}: {}/{} commands",
        report.outcome, report.completed, report.total
    );
    if let Some(journal) = &report.journal {
        println!("Journal: {}", journal.display());
    }
    match report.error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn validate_worklist(worklist: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let queue = read_worklist(&worklist).await?;
    for (index, command) in queue.commands().iter().enumerate() {
        println!("{}. {}", index + 1, command.label());
    }

    let needed: BTreeSet<String> = queue
        .commands()
        .iter()
        .flat_map(required_roles)
        .map(|role| role.to_string())
        .collect();
    println!("Instruments: {}", needed.into_iter().collect::<Vec<_>>().join(", "));

    if let Some(path) = config_path {
        let config = WorklistConfig::load_from(&path)?;
        InstrumentsBuilder::default().validate(&config)?;
        let configured: BTreeSet<String> = config
            .enabled_instruments()
            .map(|def| def.role.to_string())
            .collect();
        let missing: Vec<String> = queue
            .commands()
            .iter()
            .flat_map(required_roles)
            .map(|role| role.to_string())
            .filter(|role| !configured.contains(role))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("no instrument configured for: {}", missing.join(", "));
        }
    }
    Ok(())
}

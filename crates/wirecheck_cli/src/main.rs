//! wirecheck CLI
//!
//! Record a workload against one client dialect, replay the recording
//! against another, and diff the two command logs.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;
mod settings;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use console::style;
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use wirecheck_store::Dialect;

#[derive(Parser)]
#[command(name = "wirecheck")]
#[command(about = "wirecheck - record, replay and diff data-access wire commands", long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for wirecheck crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Diagnostic log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate a fresh store and record the feature workload
    Record {
        /// Log file to write
        #[arg(short, long)]
        output: PathBuf,
        /// Client dialect (v1 or v2)
        #[arg(short, long)]
        dialect: Option<Dialect>,
        /// Record replies so a replay can substitute them
        #[arg(long)]
        capture_replies: bool,
    },
    /// Replay a recording, writing the commands it produces
    Replay {
        /// Recording to replay
        log: PathBuf,
        /// Log file to write
        #[arg(short, long)]
        output: PathBuf,
        /// Client dialect (v1 or v2)
        #[arg(short, long)]
        dialect: Option<Dialect>,
        /// Stop at the first failing call
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Diff two recordings; exits with status 1 when they differ
    Diff {
        /// Original recording
        first: PathBuf,
        /// Replayed recording
        second: PathBuf,
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize a recording per correlation id
    Inspect {
        /// Recording to read
        log: PathBuf,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose { "wirecheck=debug" } else { "wirecheck=info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Record {
            output,
            dialect,
            capture_replies,
        } => {
            if let Some(dialect) = dialect {
                settings.store.dialect = dialect;
            }
            settings.watcher.capture_replies |= capture_replies;
            let summary = commands::record(&settings, &output)?;
            println!(
                "Recorded {} features ({} people, {} commands) to {}",
                summary.features,
                summary.people,
                summary.commands,
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Replay {
            log,
            output,
            dialect,
            stop_on_error,
        } => {
            if let Some(dialect) = dialect {
                settings.store.dialect = dialect;
            }
            settings.replay.stop_on_error |= stop_on_error;
            let summary = commands::replay(&settings, &log, &output)?;
            println!(
                "Replayed {} calls: {} completed, {} aborted, {} failed",
                summary.calls, summary.completed, summary.aborted, summary.failed
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Diff { first, second, json } => {
            let analysis = commands::diff(&settings, &first, &second)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print!("{}", wirecheck_analyze::render(&analysis));
            }
            if analysis.is_clean() {
                println!("{}", style("No differences").green());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{}", style("Recordings differ").red().bold());
                Ok(ExitCode::from(1))
            }
        }
        Commands::Inspect { log } => {
            for (id, call) in commands::inspect(&log)? {
                let status = if call.stopped {
                    style("stopped").green()
                } else {
                    style("open").yellow()
                };
                println!(
                    "{} {}: {} command(s), {} result(s), {}",
                    style(if id.is_empty() { "<none>" } else { id.as_str() }).bold(),
                    call.message,
                    call.commands,
                    call.results,
                    status
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

//! CODECO gateway entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `codeco.toml` (or `--config`) layered
//!    under `CODECO__*` environment variables and validate it.
//! 2. **Wire observability**: install a `tracing-subscriber` registry with an
//!    `EnvFilter`, a JSON or human-readable layer, and an optional
//!    OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: partner registry, transports,
//!    transmission log store and event bus, injected into the
//!    `TransmissionManager`; the orchestration listeners are installed on
//!    the bus.
//! 4. **Run a subcommand**: `encode`, `inspect`, `run`, `logs` or `retry`.

mod commands;
mod config;
mod gateway;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::{LogFilter, OutputFormat};
use crate::config::GatewayConfig;

#[derive(Parser)]
#[command(name = "codeco-gateway")]
#[command(about = "Reports container gate movements to shipping lines as EDIFACT CODECO messages")]
#[command(version)]
struct Cli {
    /// Configuration file. Defaults to `codeco.toml` when present.
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one gate event (JSON) as a CODECO interchange
    Encode {
        /// Event file, or `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },

    /// Print the segments of an EDIFACT interchange
    Inspect {
        /// EDIFACT file, or `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },

    /// Start the gateway and replay a JSON-lines file of gate events
    Run {
        /// One gateway event per line
        #[arg(value_hint = clap::ValueHint::FilePath)]
        events: PathBuf,

        /// Seconds to keep polling for acknowledgments after the replay
        #[arg(long, default_value_t = 0)]
        linger: u64,

        /// Output format for the resulting log
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the transmission log
    Logs {
        /// Only entries in FAILED
        #[arg(long, conflicts_with = "pending")]
        failed: bool,

        /// Only entries in PENDING or SENT
        #[arg(long)]
        pending: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Retry a failed transmission from the durable log
    Retry {
        /// Transmission id
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match GatewayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let guard = match telemetry::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = execute(cli.command, &config).await;
    guard.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: &GatewayConfig) -> anyhow::Result<()> {
    match command {
        Commands::Encode { input } => commands::encode(config, &input),
        Commands::Inspect { input } => commands::inspect(&input),
        Commands::Run {
            events,
            linger,
            format,
        } => commands::run(config, &events, std::time::Duration::from_secs(linger), format).await,
        Commands::Logs {
            failed,
            pending,
            format,
        } => {
            let filter = match (failed, pending) {
                (true, _) => LogFilter::Failed,
                (_, true) => LogFilter::Pending,
                _ => LogFilter::All,
            };
            commands::logs(config, filter, format).await
        }
        Commands::Retry { id, format } => commands::retry(config, &id, format).await,
    }
}

// pgqueue CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: Talk to PostgreSQL directly through the pgqueue library, no server in between.
// Design Decision: Logs go to stderr so stdout stays parseable.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgqueue::telemetry::{init_telemetry, TelemetryConfig};
use pgqueue::{QueueConfig, TaskStatus};

#[derive(Parser)]
#[command(name = "pgqueue")]
#[command(about = "pgqueue CLI - Dispatch, process and watch PostgreSQL-backed tasks")]
#[command(version)]
pub struct Cli {
    /// PostgreSQL connection string (falls back to DATABASE_URL)
    #[arg(long, env = "PGQUEUE_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the task table and indexes if missing
    Init,

    /// Insert tasks, optionally waiting for them to finish
    Dispatch {
        /// Task type
        task_id: String,

        /// JSON payloads, one task per argument
        #[arg(required = true, num_args = 1..)]
        payloads: Vec<String>,

        /// Block until every task is completed or failed
        #[arg(long)]
        wait: bool,

        /// Status poll interval while waiting, in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Run an echo worker (result = payload) until Ctrl-C
    Worker {
        /// Task type to process, with an optional batch size (e.g. resize:5)
        #[arg(long = "task", required = true, value_parser = commands::worker::parse_task_spec)]
        tasks: Vec<commands::worker::TaskSpec>,

        /// Timer wake interval, in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },

    /// Print status notifications for a task type until Ctrl-C
    Watch {
        /// Task type
        task_id: String,

        /// Only print this status (pending, processing, completed, error)
        #[arg(long)]
        status: Option<TaskStatus>,
    },

    /// Delete tasks older than the retention TTL once
    Sweep {
        /// Retention TTL (e.g. "30 days"); defaults to PGQUEUE_TASKS_TTL
        #[arg(long)]
        ttl: Option<String>,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides applied
    fn queue_config(&self) -> Result<QueueConfig> {
        let mut config = QueueConfig::from_env().context("Invalid queue configuration")?;
        if let Some(url) = &self.database_url {
            config = config.with_database_url(url.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if telemetry.log_filter.is_none() {
        let level = if cli.quiet { "warn" } else { "info" };
        telemetry.log_filter = Some(format!("pgqueue={}", level));
    }
    init_telemetry(telemetry).context("Failed to initialize logging")?;

    let config = cli.queue_config()?;
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Init => commands::init::run(config, output_format, cli.quiet).await,
        Commands::Dispatch {
            task_id,
            payloads,
            wait,
            poll_interval_ms,
            timeout_secs,
        } => {
            commands::dispatch::run(
                config,
                output_format,
                task_id,
                payloads,
                wait,
                poll_interval_ms,
                timeout_secs,
            )
            .await
        }
        Commands::Worker {
            tasks,
            poll_interval_ms,
        } => commands::worker::run(config, cli.quiet, tasks, poll_interval_ms).await,
        Commands::Watch { task_id, status } => {
            commands::watch::run(config, output_format, task_id, status).await
        }
        Commands::Sweep { ttl } => commands::sweep::run(config, output_format, ttl).await,
    }
}

//! Command-line interface for queuectl, built on clap.
//!
//! [`Cli`] holds the global flags (`--db`, `--config`, `--verbose`) and one
//! [`Command`] per administrative operation.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::state_machine::JobState;

/// Persistent background job queue with retries and a dead letter queue.
#[derive(Debug, Parser)]
#[command(name = "queuectl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the SQLite database (overrides config file and QUEUECTL_DB).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to a queuectl.toml configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a new job to the queue.
    Enqueue {
        /// Shell command to run.
        command: String,

        /// Job priority (higher runs first).
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,

        /// Kill the command after this many seconds.
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Delay the job: +30s, +5m, +2h, +1d or an RFC 3339 timestamp.
        #[arg(short, long)]
        run_at: Option<String>,
    },

    /// Manage the worker pool.
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },

    /// Show job counts per state and whether workers are running.
    Status,

    /// Show execution statistics.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List jobs, most important and most recent first.
    List {
        /// Only show jobs in this state.
        #[arg(short, long, value_enum, default_value_t = StateFilter::All)]
        state: StateFilter,
    },

    /// Show details and captured output for a job (id prefix allowed).
    Output {
        job_id: String,

        /// Print the job record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage the dead letter queue.
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },

    /// Manage queue configuration (max_retries, backoff_base).
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum WorkerAction {
    /// Start workers in the foreground until stopped.
    Start {
        /// Number of worker processes.
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
        count: u16,
    },

    /// Signal running workers to stop.
    Stop,

    /// Run a single worker loop (spawned by `worker start`).
    #[command(hide = true)]
    Run,
}

#[derive(Debug, Subcommand)]
pub enum DlqAction {
    /// List jobs in the dead letter queue.
    List,

    /// Move a dead job back to pending with its attempts reset.
    Retry { job_id: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Set a configuration value.
    Set { key: String, value: String },

    /// Print a configuration value.
    Get { key: String },

    /// Print all stored configuration values.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateFilter {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
    All,
}

impl StateFilter {
    pub fn state(self) -> Option<JobState> {
        match self {
            StateFilter::Pending => Some(JobState::Pending),
            StateFilter::Processing => Some(JobState::Processing),
            StateFilter::Completed => Some(JobState::Completed),
            StateFilter::Failed => Some(JobState::Failed),
            StateFilter::Dead => Some(JobState::Dead),
            StateFilter::All => None,
        }
    }
}

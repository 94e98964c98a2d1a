mod cli;
mod config;
mod error;
mod executor;
mod logging;
mod schedule;
mod state_machine;
mod stats;
mod store;
mod supervisor;
mod ui;
mod worker;

use std::ffi::OsString;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::debug;

use cli::{Cli, Command, ConfigAction, DlqAction, WorkerAction};
use config::QueueConfig;
use error::QueueError;
use executor::ShellExecutor;
use state_machine::{BACKOFF_BASE_KEY, JobState, MAX_RETRIES_KEY, RetryPolicy};
use stats::QueueStats;
use store::{ConfigStore, SqliteStore};
use supervisor::{PidFile, Supervisor, WorkerCommand};
use ui::Palette;
use worker::{Shutdown, Worker};

const LIST_LIMIT: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = QueueConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    logging::init(&config.log_level, cli.verbose);
    debug!(db = %config.db_path.display(), pid_file = %config.pid_file.display(), "configuration loaded");

    let ui = Palette::default();
    match run(cli, &config, &ui).await {
        Ok(()) => Ok(()),
        Err(e) => {
            ui.error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli, config: &QueueConfig, ui: &Palette) -> Result<()> {
    match cli.command {
        Command::Enqueue {
            command,
            priority,
            timeout,
            run_at,
        } => {
            let store = open_store(config)?;
            let now = Utc::now();
            let run_at = run_at
                .as_deref()
                .map(|input| schedule::parse_run_at(input, now))
                .transpose()?;
            let job = store.enqueue(&command, priority, timeout, run_at, now)?;
            ui.enqueued(&job, now);
        }

        Command::Worker { action } => match action {
            WorkerAction::Start { count } => {
                // Make sure the schema exists before any child races to create it.
                open_store(config)?;
                let worker = WorkerCommand::current_exe(worker_args(&cli.config, config))?;
                let pid_file = PidFile::new(config.pid_file.clone());
                println!(
                    "Starting {count} worker(s)... PID file: {}",
                    pid_file.path().display()
                );
                let supervisor = Supervisor::new(pid_file, config.shutdown_grace());
                println!("Press Ctrl+C to stop.");
                supervisor.start(usize::from(count), &worker).await?;
                println!("All workers stopped.");
            }
            WorkerAction::Stop => {
                let supervisor = Supervisor::new(
                    PidFile::new(config.pid_file.clone()),
                    config.shutdown_grace(),
                );
                ui.stopped(supervisor.stop()?);
            }
            WorkerAction::Run => {
                let store = open_store(config)?;
                let shutdown = Shutdown::new();
                shutdown
                    .listen_for_signals()
                    .context("failed to install signal handlers")?;
                let worker = Worker::new(
                    store,
                    ShellExecutor::default(),
                    config.poll_interval(),
                    shutdown,
                );
                worker.run().await;
            }
        },

        Command::Status => {
            let store = open_store(config)?;
            let counts = store.counts_by_state()?;
            let running = PidFile::new(config.pid_file.clone()).running_pid()?;
            ui.status(&counts, running);
        }

        Command::Stats { json } => {
            let store = open_store(config)?;
            let stats = QueueStats::collect(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                ui.stats(&stats);
            }
        }

        Command::List { state } => {
            let store = open_store(config)?;
            let state = state.state();
            let jobs = store.list(state, LIST_LIMIT)?;
            let title = match state {
                Some(state) => format!("Jobs ({state})"),
                None => "All Jobs".to_string(),
            };
            ui.jobs(&title, &jobs);
        }

        Command::Output { job_id, json } => {
            let store = open_store(config)?;
            let job = store
                .find_by_prefix(&job_id, None)?
                .ok_or(QueueError::JobNotFound(job_id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                ui.job_detail(&job);
            }
        }

        Command::Dlq { action } => {
            let store = open_store(config)?;
            match action {
                DlqAction::List => {
                    let jobs = store.list(Some(JobState::Dead), LIST_LIMIT)?;
                    ui.jobs("Dead Letter Queue", &jobs);
                }
                DlqAction::Retry { job_id } => {
                    let job = store.retry_dead(&job_id, Utc::now())?;
                    ui.revived(&job);
                }
            }
        }

        Command::Config { action } => {
            let store = open_store(config)?;
            match action {
                ConfigAction::Set { key, value } => {
                    store.set_config(&key, &value)?;
                    println!("Set {key} = {value}");
                }
                ConfigAction::Get { key } => {
                    let defaults = RetryPolicy::default();
                    let fallback = if key == MAX_RETRIES_KEY {
                        defaults.default_max_retries.to_string()
                    } else if key == BACKOFF_BASE_KEY {
                        defaults.backoff_base.to_string()
                    } else {
                        String::new()
                    };
                    let value = ConfigStore::get(&store, &key, &fallback)?;
                    if value.is_empty() {
                        println!("{key} is not set");
                    } else {
                        println!("{key} = {value}");
                    }
                }
                ConfigAction::List => {
                    let policy = RetryPolicy::load(&store);
                    println!("{MAX_RETRIES_KEY} = {}", policy.default_max_retries);
                    println!("{} = {}", BACKOFF_BASE_KEY, policy.backoff_base);
                    for (key, value) in store.list_config()? {
                        if key != MAX_RETRIES_KEY && key != BACKOFF_BASE_KEY {
                            println!("{key} = {value}");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn open_store(config: &QueueConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

/// Arguments that make a child process see the same database and config.
fn worker_args(config_file: &Option<std::path::PathBuf>, config: &QueueConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--db".into(), config.db_path.clone().into()];
    if let Some(path) = config_file {
        args.push("--config".into());
        args.push(path.clone().into());
    }
    args.push("worker".into());
    args.push("run".into());
    args
}

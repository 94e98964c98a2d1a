use thiserror::Error;

use crate::state_machine::JobState;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} not found in DLQ")]
    NotInDlq(String),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Invalid run_at value '{0}'. Use +30s, +5m, +2h, +1d or an RFC 3339 timestamp")]
    InvalidRunAt(String),

    #[error("Invalid value for config key '{key}': {value} (expected a non-negative integer)")]
    InvalidConfig { key: String, value: String },

    #[error("Workers are already running (PID: {pid}). Use 'worker stop' first.")]
    AlreadyRunning { pid: i32 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signal error: {0}")]
    Signal(#[from] nix::errno::Errno),
}

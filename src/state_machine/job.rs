use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;

/// Why an execution did not succeed.
///
/// Both kinds advance the retry counter identically; the distinction only
/// shows up in logs and the recorded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The command ran past its configured timeout and was killed.
    TimedOut { after_secs: u64 },
    /// Non-zero exit, signal, or the command could not be spawned.
    Failed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::TimedOut { after_secs } => write!(f, "timed out after {after_secs}s"),
            FailureKind::Failed => write!(f, "command failed"),
        }
    }
}

/// Result of running one job command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: Option<u64>,
}

impl ExecutionOutcome {
    pub fn succeeded(stdout: String, stderr: String) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            timed_out: None,
        }
    }

    pub fn failed(stdout: String, stderr: String) -> Self {
        Self {
            success: false,
            stdout,
            stderr,
            timed_out: None,
        }
    }

    pub fn timed_out(stdout: String, after_secs: u64) -> Self {
        Self {
            success: false,
            stdout,
            stderr: format!("Command timed out after {after_secs} seconds"),
            timed_out: Some(after_secs),
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match (self.success, self.timed_out) {
            (true, _) => None,
            (false, Some(after_secs)) => Some(FailureKind::TimedOut { after_secs }),
            (false, None) => Some(FailureKind::Failed),
        }
    }

    /// The text persisted in the job's `output` column.
    pub fn combined_output(&self) -> String {
        format!("STDOUT:\n{}\n\nSTDERR:\n{}", self.stdout, self.stderr)
    }
}

/// A row of the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub priority: i64,
    pub attempts: u32,
    pub max_retries: u32,
    /// Wall-clock limit in seconds; `None` runs unbounded.
    pub timeout: Option<u64>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Execution time in milliseconds.
    pub duration: Option<i64>,
    pub output: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `pending` job, eligible immediately.
    pub fn new(
        command: String,
        priority: i64,
        timeout: Option<u64>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command,
            state: JobState::Pending,
            priority,
            attempts: 0,
            max_retries,
            timeout,
            next_run_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration: None,
            output: None,
            updated_at: now,
        }
    }

    /// First 8 characters of the id, as shown in listings.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state.is_claimable() && self.next_run_at <= now
    }
}

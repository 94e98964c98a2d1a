use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::job::{ExecutionOutcome, Job};
use super::retry::{RetryDecision, RetryPolicy};
use crate::error::QueueError;

/// The five lifecycle states of a queued job.
///
/// pending → processing → completed
/// pending → processing → failed → processing → … → dead
/// dead → pending (administrative DLQ retry only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Only `completed` and `dead` are terminal; `dead` can still be revived by an operator.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// States the claimer may pick from (subject to `next_run_at <= now`).
    pub fn is_claimable(self) -> bool {
        matches!(self, JobState::Pending | JobState::Failed)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, to: JobState) -> bool {
        matches!(
            (self, to),
            (JobState::Pending, JobState::Processing)
                | (JobState::Failed, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Processing, JobState::Dead)
                | (JobState::Dead, JobState::Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidState(other.to_string())),
        }
    }
}

/// The state change decided for a job leaving `processing`.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Execution succeeded.
    Complete,
    /// Execution failed with retry budget left; eligible again at `next_run_at`.
    Retry {
        attempts: u32,
        delay_secs: u64,
        next_run_at: DateTime<Utc>,
    },
    /// Execution failed and the retry budget is exhausted.
    DeadLetter { attempts: u32 },
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Transition::Complete => JobState::Completed,
            Transition::Retry { .. } => JobState::Failed,
            Transition::DeadLetter { .. } => JobState::Dead,
        }
    }
}

/// Everything the store needs to persist the end of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub job_id: String,
    pub transition: Transition,
    pub output: String,
    pub duration_ms: i64,
    pub finished_at: DateTime<Utc>,
}

/// Decides how a claimed job leaves `processing`.
pub struct StateMachine;

impl StateMachine {
    /// Compute the finalization for `job` given the execution outcome.
    ///
    /// A timed-out execution is an ordinary failure here; only the recorded
    /// output tells the two apart.
    pub fn finalize(
        job: &Job,
        outcome: &ExecutionOutcome,
        policy: &RetryPolicy,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Finalization, QueueError> {
        let transition = if outcome.success {
            Transition::Complete
        } else {
            match policy.decide(job.attempts, job.max_retries) {
                RetryDecision::Retry {
                    attempts,
                    delay_secs,
                } => Transition::Retry {
                    attempts,
                    delay_secs,
                    next_run_at: retry_at(now, delay_secs),
                },
                RetryDecision::DeadLetter { attempts } => Transition::DeadLetter { attempts },
            }
        };

        let target = transition.target();
        if !job.state.can_transition_to(target) {
            return Err(QueueError::InvalidTransition {
                from: job.state,
                to: target,
            });
        }

        Ok(Finalization {
            job_id: job.id.clone(),
            transition,
            output: outcome.combined_output(),
            duration_ms,
            finished_at: now,
        })
    }
}

// Delays past chrono's range pin the job to the far future instead of overflowing.
fn retry_at(now: DateTime<Utc>, delay_secs: u64) -> DateTime<Utc> {
    i64::try_from(delay_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

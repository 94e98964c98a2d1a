//! Aggregate queue statistics for `queuectl stats`.

use serde::Serialize;

use crate::error::QueueError;
use crate::state_machine::{Job, JobState};
use crate::store::{SqliteStore, StateCount};

const SLOWEST_LIMIT: usize = 5;

/// Summary of completed-job execution times, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationSummary {
    pub count: usize,
    pub average: f64,
    pub min: i64,
    pub max: i64,
    pub p50: i64,
    pub p90: i64,
    pub p99: i64,
}

impl DurationSummary {
    /// `None` for an empty input. Input order does not matter.
    pub fn from_durations(mut durations: Vec<i64>) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        durations.sort_unstable();
        let count = durations.len();
        let sum: i128 = durations.iter().map(|d| i128::from(*d)).sum();

        Some(Self {
            count,
            average: sum as f64 / count as f64,
            min: durations[0],
            max: durations[count - 1],
            p50: percentile(&durations, 50),
            p90: percentile(&durations, 90),
            p99: percentile(&durations, 99),
        })
    }
}

/// Nearest-rank percentile over a sorted, non-empty slice.
fn percentile(sorted: &[i64], pct: u32) -> i64 {
    let n = sorted.len();
    let rank = (pct as usize * n).div_ceil(100).clamp(1, n);
    sorted[rank - 1]
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowJob {
    pub id: String,
    pub command: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub counts: Vec<StateCount>,
    pub durations: Option<DurationSummary>,
    pub slowest: Vec<SlowJob>,
    /// `(priority, jobs)`, highest first.
    pub priorities: Vec<(i64, u64)>,
    pub with_timeout: u64,
}

impl QueueStats {
    pub fn collect(store: &SqliteStore) -> Result<Self, QueueError> {
        let slowest = store
            .slowest_completed(SLOWEST_LIMIT)?
            .into_iter()
            .map(|job: Job| SlowJob {
                duration_ms: job.duration.unwrap_or_default(),
                id: job.id,
                command: job.command,
            })
            .collect();

        Ok(Self {
            total: store.total_jobs()?,
            counts: store.counts_by_state()?,
            durations: DurationSummary::from_durations(store.completed_durations()?),
            slowest,
            priorities: store.priority_histogram()?,
            with_timeout: store.count_with_timeout()?,
        })
    }

    pub fn count(&self, state: JobState) -> u64 {
        self.counts
            .iter()
            .find(|c| c.state == state)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Completed share of all jobs, in percent.
    pub fn success_rate(&self) -> Option<f64> {
        let completed = self.count(JobState::Completed);
        if completed == 0 || self.total == 0 {
            return None;
        }
        Some(completed as f64 * 100.0 / self.total as f64)
    }

    /// The histogram is only interesting once someone uses priorities.
    pub fn uses_priorities(&self) -> bool {
        self.priorities.iter().any(|(priority, _)| *priority != 0)
    }
}

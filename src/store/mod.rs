//! Persistence seams for jobs and queue configuration.
//!
//! The worker only talks to [`JobStore`] and [`ConfigStore`]; [`SqliteStore`]
//! is the shipped implementation of both.

mod sqlite;

pub use sqlite::{SqliteStore, StateCount};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::QueueError;
use crate::state_machine::{Finalization, Job};

/// Authoritative job storage shared by every worker process.
pub trait JobStore {
    /// Atomically move the highest-priority, oldest eligible job into
    /// `processing` and return it.
    ///
    /// Returns `Ok(None)` both when nothing is eligible and when another
    /// worker won the race for the selected row.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, QueueError>;

    /// Persist the end of an execution. Returns `false` if the job was no
    /// longer in `processing`.
    fn finalize(&self, finalization: &Finalization) -> Result<bool, QueueError>;
}

/// Key/value queue configuration.
pub trait ConfigStore {
    fn get(&self, key: &str, default: &str) -> Result<String, QueueError>;

    /// Integer lookup; a value that does not parse falls back to `default`.
    fn get_int(&self, key: &str, default: u64) -> Result<u64, QueueError> {
        let raw = self.get(key, &default.to_string())?;
        match raw.trim().parse::<u64>() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(key, value = %raw, default, "config value is not an integer");
                Ok(default)
            }
        }
    }
}

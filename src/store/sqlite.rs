//! SQLite-backed job and configuration store.
//!
//! Every worker process opens its own connection to the same database file.
//! Claiming is a compare-and-swap on the state observed at selection time,
//! executed inside an immediate transaction; nothing else coordinates workers.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, warn};

use super::{ConfigStore, JobStore};
use crate::error::QueueError;
use crate::state_machine::{
    BACKOFF_BASE_KEY, Finalization, Job, JobState, MAX_RETRIES_KEY, RetryPolicy, Transition,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    command      TEXT NOT NULL,
    state        TEXT NOT NULL DEFAULT 'pending',
    priority     INTEGER NOT NULL DEFAULT 0,
    attempts     INTEGER NOT NULL DEFAULT 0,
    max_retries  INTEGER NOT NULL,
    timeout      INTEGER,
    next_run_at  INTEGER NOT NULL,
    created_at   INTEGER NOT NULL,
    started_at   INTEGER,
    completed_at INTEGER,
    duration     INTEGER,
    output       TEXT,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_eligible ON jobs (state, next_run_at);
CREATE TABLE IF NOT EXISTS configuration (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const JOB_COLUMNS: &str = "id, command, state, priority, attempts, max_retries, timeout, \
     next_run_at, created_at, started_at, completed_at, duration, output, updated_at";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of jobs currently in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateCount {
    pub state: JobState,
    pub count: u64,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened job store");
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, QueueError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, QueueError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a new `pending` job. Its retry budget is the configured
    /// `max_retries` at enqueue time.
    pub fn enqueue(
        &self,
        command: &str,
        priority: i64,
        timeout: Option<u64>,
        run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        let policy = RetryPolicy::load(self);
        let mut job = Job::new(
            command.to_string(),
            priority,
            timeout,
            policy.default_max_retries,
            now,
        );
        if let Some(run_at) = run_at {
            job.next_run_at = run_at;
        }

        self.conn.execute(
            "INSERT INTO jobs (id, command, state, priority, attempts, max_retries, timeout,
                               next_run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.command,
                job.state.as_str(),
                job.priority,
                job.attempts,
                job.max_retries,
                job.timeout.map(clamp_i64),
                millis(job.next_run_at),
                millis(job.created_at),
                millis(job.updated_at),
            ],
        )?;
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Resolve a full id or an id prefix, optionally restricted to one state.
    ///
    /// An exact match wins; otherwise the oldest job whose id starts with
    /// `prefix` is returned.
    pub fn find_by_prefix(
        &self,
        prefix: &str,
        state: Option<JobState>,
    ) -> Result<Option<Job>, QueueError> {
        let pattern = format!("{}%", escape_like(prefix));
        let job = self
            .conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE id LIKE ?1 ESCAPE '\\' AND (?2 IS NULL OR state = ?2)
                     ORDER BY (id = ?3) DESC, created_at ASC, rowid ASC
                     LIMIT 1"
                ),
                params![pattern, state.map(JobState::as_str), prefix],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Most important first, then most recent.
    pub fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, QueueError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE (?1 IS NULL OR state = ?1)
             ORDER BY priority DESC, created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let jobs = stmt
            .query_map(
                params![state.map(JobState::as_str), clamp_i64(limit as u64)],
                job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Counts for all five states, zeros included, in lifecycle order.
    pub fn counts_by_state(&self) -> Result<Vec<StateCount>, QueueError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts: Vec<StateCount> = JobState::ALL
            .into_iter()
            .map(|state| StateCount { state, count: 0 })
            .collect();
        for (state, count) in rows {
            let state: JobState = state.parse()?;
            if let Some(entry) = counts.iter_mut().find(|c| c.state == state) {
                entry.count = count.max(0) as u64;
            }
        }
        Ok(counts)
    }

    /// Administrative `dead -> pending`: attempts reset, eligible immediately.
    pub fn retry_dead(&self, prefix: &str, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let job = self
            .find_by_prefix(prefix, Some(JobState::Dead))?
            .ok_or_else(|| QueueError::NotInDlq(prefix.to_string()))?;

        let updated = self.conn.execute(
            "UPDATE jobs SET state = 'pending', attempts = 0, next_run_at = ?1, updated_at = ?1
             WHERE id = ?2 AND state = 'dead'",
            params![millis(now), job.id],
        )?;
        if updated == 0 {
            return Err(QueueError::NotInDlq(prefix.to_string()));
        }

        self.get_job(&job.id)?
            .ok_or_else(|| QueueError::JobNotFound(job.id.clone()))
    }

    /// Upsert a configuration value. Known numeric keys are validated.
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        validate_config(key, value)?;
        self.conn.execute(
            "INSERT INTO configuration (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, millis(Utc::now())],
        )?;
        Ok(())
    }

    pub fn list_config(&self) -> Result<Vec<(String, String)>, QueueError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM configuration ORDER BY key")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn total_jobs(&self) -> Result<u64, QueueError> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(total.max(0) as u64)
    }

    /// Durations of completed jobs, ascending.
    pub fn completed_durations(&self) -> Result<Vec<i64>, QueueError> {
        let mut stmt = self.conn.prepare(
            "SELECT duration FROM jobs
             WHERE state = 'completed' AND duration IS NOT NULL
             ORDER BY duration ASC",
        )?;
        let durations = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(durations)
    }

    pub fn slowest_completed(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE state = 'completed' AND duration IS NOT NULL
             ORDER BY duration DESC
             LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![clamp_i64(limit as u64)], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// `(priority, job count)`, highest priority first.
    pub fn priority_histogram(&self) -> Result<Vec<(i64, u64)>, QueueError> {
        let mut stmt = self.conn.prepare(
            "SELECT priority, COUNT(*) FROM jobs GROUP BY priority ORDER BY priority DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_with_timeout(&self) -> Result<u64, QueueError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE timeout IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl JobStore for SqliteStore {
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let candidate = tx
            .query_row(
                "SELECT id, state FROM jobs
                 WHERE state IN ('pending', 'failed') AND next_run_at <= ?1
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT 1",
                params![millis(now)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((id, observed)) = candidate else {
            return Ok(None);
        };
        let observed: JobState = observed.parse()?;

        let job = compare_and_claim(&tx, &id, observed, now)?;
        if job.is_some() {
            tx.commit()?;
        } else {
            debug!(job_id = %id, "claim race lost");
        }
        Ok(job)
    }

    fn finalize(&self, fin: &Finalization) -> Result<bool, QueueError> {
        let finished = millis(fin.finished_at);
        let updated = match &fin.transition {
            Transition::Complete => self.conn.execute(
                "UPDATE jobs SET state = 'completed', output = ?1, duration = ?2,
                                 completed_at = ?3, updated_at = ?3
                 WHERE id = ?4 AND state = 'processing'",
                params![fin.output, fin.duration_ms, finished, fin.job_id],
            )?,
            Transition::Retry {
                attempts,
                next_run_at,
                ..
            } => self.conn.execute(
                "UPDATE jobs SET state = 'failed', attempts = ?1, next_run_at = ?2,
                                 output = ?3, duration = ?4, updated_at = ?5
                 WHERE id = ?6 AND state = 'processing'",
                params![
                    attempts,
                    millis(*next_run_at),
                    fin.output,
                    fin.duration_ms,
                    finished,
                    fin.job_id
                ],
            )?,
            Transition::DeadLetter { attempts } => self.conn.execute(
                "UPDATE jobs SET state = 'dead', attempts = ?1, output = ?2, duration = ?3,
                                 completed_at = ?4, updated_at = ?4
                 WHERE id = ?5 AND state = 'processing'",
                params![attempts, fin.output, fin.duration_ms, finished, fin.job_id],
            )?,
        };

        if updated == 0 {
            warn!(job_id = %fin.job_id, "job left processing before finalization");
        }
        Ok(updated > 0)
    }
}

impl ConfigStore for SqliteStore {
    fn get(&self, key: &str, default: &str) -> Result<String, QueueError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM configuration WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }
}

/// Move `id` to `processing` only if it is still in `observed`.
fn compare_and_claim(
    conn: &Connection,
    id: &str,
    observed: JobState,
    now: DateTime<Utc>,
) -> Result<Option<Job>, QueueError> {
    let updated = conn.execute(
        "UPDATE jobs SET state = 'processing', started_at = ?1, updated_at = ?1
         WHERE id = ?2 AND state = ?3",
        params![millis(now), id, observed.as_str()],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    let job = conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id],
        job_from_row,
    )?;
    Ok(Some(job))
}

fn validate_config(key: &str, value: &str) -> Result<(), QueueError> {
    let numeric = key == MAX_RETRIES_KEY || key == BACKOFF_BASE_KEY;
    if numeric && value.trim().parse::<u32>().is_err() {
        return Err(QueueError::InvalidConfig {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let state: String = row.get("state")?;
    let state = state.parse::<JobState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
    })?;
    let timeout: Option<i64> = row.get("timeout")?;

    Ok(Job {
        id: row.get("id")?,
        command: row.get("command")?,
        state,
        priority: row.get("priority")?,
        attempts: row.get("attempts")?,
        max_retries: row.get("max_retries")?,
        timeout: timeout.and_then(|t| u64::try_from(t).ok()),
        next_run_at: timestamp(row, "next_run_at")?,
        created_at: timestamp(row, "created_at")?,
        started_at: optional_timestamp(row, "started_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
        duration: row.get("duration")?,
        output: row.get("output")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(column)?;
    from_millis(row, column, ms)
}

fn optional_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(column)?;
    ms.map(|ms| from_millis(row, column, ms)).transpose()
}

fn from_millis(row: &Row<'_>, column: &str, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::IntegralValueOutOfRange(idx, ms)
    })
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};

    use chrono::TimeDelta;

    use crate::state_machine::{ExecutionOutcome, StateMachine};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn fail(store: &SqliteStore, job: &Job, now: DateTime<Utc>) -> Finalization {
        let outcome = ExecutionOutcome::failed(String::new(), "exit 1".into());
        let fin =
            StateMachine::finalize(job, &outcome, &RetryPolicy::load(store), 10, now).unwrap();
        assert!(store.finalize(&fin).unwrap());
        fin
    }

    #[test]
    fn enqueue_uses_configured_max_retries() {
        let store = store();
        let now = Utc::now();
        let job = store.enqueue("echo a", 0, None, None, now).unwrap();
        assert_eq!(job.max_retries, 3);

        store.set_config(MAX_RETRIES_KEY, "5").unwrap();
        let job = store.enqueue("echo b", 0, Some(30), None, now).unwrap();
        assert_eq!(job.max_retries, 5);

        let stored = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.timeout, Some(30));
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.next_run_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn claim_prefers_higher_priority() {
        let store = store();
        let now = Utc::now();
        let low = store.enqueue("echo low", 5, None, None, now).unwrap();
        let high = store
            .enqueue("echo high", 10, None, None, now + TimeDelta::seconds(1))
            .unwrap();

        let later = now + TimeDelta::seconds(2);
        let first = store.claim_next(later).unwrap().unwrap();
        assert_eq!(first.id, high.id);
        assert_eq!(first.state, JobState::Processing);
        assert_eq!(
            first.started_at.map(|t| t.timestamp_millis()),
            Some(later.timestamp_millis())
        );

        let second = store.claim_next(later).unwrap().unwrap();
        assert_eq!(second.id, low.id);
        assert!(store.claim_next(later).unwrap().is_none());
    }

    #[test]
    fn claim_is_fifo_within_priority() {
        let store = store();
        let now = Utc::now();
        let older = store.enqueue("echo 1", 0, None, None, now).unwrap();
        let newer = store
            .enqueue("echo 2", 0, None, None, now + TimeDelta::seconds(5))
            .unwrap();

        let at = now + TimeDelta::seconds(6);
        assert_eq!(store.claim_next(at).unwrap().unwrap().id, older.id);
        assert_eq!(store.claim_next(at).unwrap().unwrap().id, newer.id);
    }

    #[test]
    fn claim_waits_for_run_at() {
        let store = store();
        let now = Utc::now();
        let run_at = now + TimeDelta::seconds(10);
        let job = store.enqueue("echo later", 0, None, Some(run_at), now).unwrap();

        assert!(store.claim_next(now).unwrap().is_none());
        assert!(store.claim_next(now + TimeDelta::seconds(9)).unwrap().is_none());
        assert_eq!(store.claim_next(run_at).unwrap().unwrap().id, job.id);
    }

    #[test]
    fn processing_jobs_are_never_reclaimed() {
        let store = store();
        let now = Utc::now();
        store.enqueue("sleep 1", 0, None, None, now).unwrap();
        assert!(store.claim_next(now).unwrap().is_some());
        assert!(
            store
                .claim_next(now + TimeDelta::days(1))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn stale_observed_state_loses_the_race() {
        let store = store();
        let now = Utc::now();
        let job = store.enqueue("echo", 0, None, None, now).unwrap();

        let won = compare_and_claim(&store.conn, &job.id, JobState::Pending, now).unwrap();
        assert!(won.is_some());
        let lost = compare_and_claim(&store.conn, &job.id, JobState::Pending, now).unwrap();
        assert!(lost.is_none());
    }

    #[test]
    fn three_failures_walk_to_dead() {
        let store = store();
        let now = Utc::now();
        store.enqueue("exit 1", 0, None, None, now).unwrap();

        let job = store.claim_next(now).unwrap().unwrap();
        let fin = fail(&store, &job, now);
        let job = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert!(matches!(fin.transition, Transition::Retry { delay_secs: 2, .. }));
        assert_eq!(
            job.next_run_at.timestamp_millis(),
            (now + TimeDelta::seconds(2)).timestamp_millis()
        );

        // Not eligible until the backoff elapses.
        assert!(store.claim_next(now + TimeDelta::seconds(1)).unwrap().is_none());

        let t2 = now + TimeDelta::seconds(2);
        let job = store.claim_next(t2).unwrap().unwrap();
        let fin = fail(&store, &job, t2);
        assert!(matches!(fin.transition, Transition::Retry { delay_secs: 4, .. }));
        let job = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.attempts, 2);

        let t3 = t2 + TimeDelta::seconds(4);
        let job = store.claim_next(t3).unwrap().unwrap();
        fail(&store, &job, t3);
        let job = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 3);
        assert!(job.completed_at.is_some());
        assert!(job.output.unwrap().contains("exit 1"));

        // Dead jobs are never selected.
        assert!(store.claim_next(t3 + TimeDelta::days(365)).unwrap().is_none());
    }

    #[test]
    fn success_records_completion() {
        let store = store();
        let now = Utc::now();
        store.enqueue("echo ok", 0, None, None, now).unwrap();
        let job = store.claim_next(now).unwrap().unwrap();

        let outcome = ExecutionOutcome::succeeded("ok\n".into(), String::new());
        let fin =
            StateMachine::finalize(&job, &outcome, &RetryPolicy::default(), 42, now).unwrap();
        assert!(store.finalize(&fin).unwrap());

        let job = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.duration, Some(42));
        assert_eq!(job.attempts, 0);
        assert!(job.completed_at.is_some());

        // A second finalization for the same execution is ignored.
        assert!(!store.finalize(&fin).unwrap());
    }

    #[test]
    fn backoff_base_is_read_at_finalization() {
        let store = store();
        let now = Utc::now();
        store.enqueue("exit 1", 0, None, None, now).unwrap();
        store.set_config(BACKOFF_BASE_KEY, "10").unwrap();

        let job = store.claim_next(now).unwrap().unwrap();
        let fin = fail(&store, &job, now);
        assert!(matches!(fin.transition, Transition::Retry { delay_secs: 10, .. }));
    }

    #[test]
    fn dlq_retry_revives_job() {
        let store = store();
        let now = Utc::now();
        store.set_config(MAX_RETRIES_KEY, "1").unwrap();
        let job = store.enqueue("exit 1", 0, None, None, now).unwrap();
        let claimed = store.claim_next(now).unwrap().unwrap();
        fail(&store, &claimed, now);
        assert_eq!(store.get_job(&job.id).unwrap().unwrap().state, JobState::Dead);

        let later = now + TimeDelta::minutes(5);
        let revived = store.retry_dead(&job.id[..8], later).unwrap();
        assert_eq!(revived.id, job.id);
        assert_eq!(revived.state, JobState::Pending);
        assert_eq!(revived.attempts, 0);
        assert_eq!(revived.next_run_at.timestamp_millis(), later.timestamp_millis());

        assert_eq!(store.claim_next(later).unwrap().unwrap().id, job.id);
    }

    #[test]
    fn dlq_retry_rejects_live_jobs() {
        let store = store();
        let now = Utc::now();
        let job = store.enqueue("echo", 0, None, None, now).unwrap();

        let err = store.retry_dead(&job.id, now).unwrap_err();
        assert!(matches!(err, QueueError::NotInDlq(_)));
        assert!(matches!(
            store.retry_dead("does-not-exist", now).unwrap_err(),
            QueueError::NotInDlq(_)
        ));
        assert_eq!(store.get_job(&job.id).unwrap().unwrap().state, JobState::Pending);
    }

    #[test]
    fn prefix_lookup() {
        let store = store();
        let now = Utc::now();
        let job = store.enqueue("echo", 0, None, None, now).unwrap();

        let found = store.find_by_prefix(&job.id[..4], None).unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(
            store.find_by_prefix(&job.id, None).unwrap().unwrap().id,
            job.id
        );
        assert!(
            store
                .find_by_prefix(&job.id, Some(JobState::Dead))
                .unwrap()
                .is_none()
        );
        // Wildcards are matched literally.
        assert!(store.find_by_prefix("%", None).unwrap().is_none());
        assert!(store.find_by_prefix("zz", None).unwrap().is_none());
    }

    #[test]
    fn list_orders_by_priority_then_recency() {
        let store = store();
        let now = Utc::now();
        let a = store.enqueue("a", 1, None, None, now).unwrap();
        let b = store
            .enqueue("b", 1, None, None, now + TimeDelta::seconds(1))
            .unwrap();
        let c = store.enqueue("c", 9, None, None, now).unwrap();

        let ids: Vec<_> = store
            .list(None, 50)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![c.id.clone(), b.id, a.id]);

        assert_eq!(store.list(None, 1).unwrap().len(), 1);
        assert!(store.list(Some(JobState::Dead), 50).unwrap().is_empty());
    }

    #[test]
    fn counts_include_empty_states() {
        let store = store();
        let now = Utc::now();
        store.enqueue("a", 0, None, None, now).unwrap();
        store.enqueue("b", 0, None, None, now).unwrap();
        store.claim_next(now).unwrap();

        let counts = store.counts_by_state().unwrap();
        assert_eq!(counts.len(), 5);
        let count = |s: JobState| counts.iter().find(|c| c.state == s).unwrap().count;
        assert_eq!(count(JobState::Pending), 1);
        assert_eq!(count(JobState::Processing), 1);
        assert_eq!(count(JobState::Dead), 0);
    }

    #[test]
    fn config_upsert_and_validation() {
        let store = store();
        assert_eq!(store.get("backoff_base", "2").unwrap(), "2");
        assert!(store.get_job("backoff_base").unwrap().is_none());

        store.set_config("backoff_base", "3").unwrap();
        store.set_config("backoff_base", "4").unwrap();
        assert_eq!(store.get("backoff_base", "2").unwrap(), "4");

        assert!(matches!(
            store.set_config("max_retries", "many"),
            Err(QueueError::InvalidConfig { .. })
        ));
        assert!(store.set_config("max_retries", "-1").is_err());

        store.set_config("owner", "ops-team").unwrap();
        assert_eq!(
            store.list_config().unwrap(),
            vec![
                ("backoff_base".to_string(), "4".to_string()),
                ("owner".to_string(), "ops-team".to_string()),
            ]
        );
    }

    #[test]
    fn bad_integer_config_falls_back() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO configuration (key, value, updated_at) VALUES ('backoff_base', 'x', 0)",
                [],
            )
            .unwrap();
        assert_eq!(store.get_int("backoff_base", 2).unwrap(), 2);
    }

    #[test]
    fn concurrent_claimers_never_share_a_job() {
        const JOBS: usize = 40;
        const WORKERS: usize = 8;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let now = Utc::now();
        {
            let store = SqliteStore::open(&path).unwrap();
            for i in 0..JOBS {
                store
                    .enqueue(&format!("echo {i}"), (i % 3) as i64, None, None, now)
                    .unwrap();
            }
        }

        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let store = SqliteStore::open(&path).unwrap();
                    barrier.wait();
                    let mut claimed = Vec::new();
                    loop {
                        match store.claim_next(now) {
                            Ok(Some(job)) => claimed.push(job.id),
                            Ok(None) => break,
                            Err(_) => continue,
                        }
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.join().unwrap() {
                total += 1;
                assert!(seen.insert(id), "job claimed twice");
            }
        }
        assert_eq!(total, JOBS);

        let store = SqliteStore::open(&path).unwrap();
        let processing = store.list(Some(JobState::Processing), 100).unwrap();
        assert_eq!(processing.len(), JOBS);
    }

    #[test]
    fn stats_queries() {
        let store = store();
        let now = Utc::now();
        for (cmd, priority, duration) in [("a", 0, 30), ("b", 5, 10), ("c", 5, 20)] {
            store.enqueue(cmd, priority, Some(5), None, now).unwrap();
            let job = store.claim_next(now).unwrap().unwrap();
            let fin = StateMachine::finalize(
                &job,
                &ExecutionOutcome::succeeded(String::new(), String::new()),
                &RetryPolicy::default(),
                duration,
                now,
            )
            .unwrap();
            store.finalize(&fin).unwrap();
        }
        store.enqueue("d", 0, None, None, now).unwrap();

        assert_eq!(store.total_jobs().unwrap(), 4);
        assert_eq!(store.completed_durations().unwrap(), vec![10, 20, 30]);
        let slowest = store.slowest_completed(2).unwrap();
        assert_eq!(slowest[0].command, "a");
        assert_eq!(slowest[1].command, "c");
        assert_eq!(store.priority_histogram().unwrap(), vec![(5, 2), (0, 2)]);
        assert_eq!(store.count_with_timeout().unwrap(), 3);
    }

    #[test]
    fn escape_like_wildcards() {
        assert_eq!(escape_like("ab%_\\"), "ab\\%\\_\\\\");
        assert_eq!(escape_like("1f3a"), "1f3a");
    }
}

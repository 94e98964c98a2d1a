//! The per-process worker loop: claim, execute, finalize, repeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::executor::CommandExecutor;
use crate::state_machine::{
    FailureKind, Finalization, Job, RetryPolicy, StateMachine, Transition,
};
use crate::store::{ConfigStore, JobStore};

/// Cooperative shutdown flag, checked only between jobs.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trigger on SIGTERM or SIGINT. Must be called inside a tokio runtime.
    pub fn listen_for_signals(&self) -> std::io::Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let flag = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, finishing current job"),
                _ = sigint.recv() => info!("received SIGINT, finishing current job"),
            }
            flag.trigger();
        });
        Ok(())
    }
}

pub struct Worker<S, E> {
    store: S,
    executor: E,
    poll_interval: Duration,
    shutdown: Shutdown,
}

impl<S, E> Worker<S, E>
where
    S: JobStore + ConfigStore,
    E: CommandExecutor,
{
    pub fn new(store: S, executor: E, poll_interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            store,
            executor,
            poll_interval,
            shutdown,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run until shutdown is requested. A job that has been claimed is always
    /// run to completion and finalized before the flag is looked at again.
    pub async fn run(&self) {
        let pid = std::process::id();
        info!(pid, "worker starting");

        while !self.shutdown.is_triggered() {
            if self.tick(Utc::now()).await.is_none() && !self.shutdown.is_triggered() {
                sleep(self.poll_interval).await;
            }
        }

        info!(pid, "worker exiting");
    }

    /// One claim → execute → finalize cycle. Returns `None` when no job was
    /// claimed or the result could not be recorded.
    pub async fn tick(&self, now: DateTime<Utc>) -> Option<Finalization> {
        let job = self.claim(now)?;
        info!(job_id = %job.id, command = %job.command, priority = job.priority, "processing job");

        let started = Instant::now();
        let outcome = self.executor.execute(&job.command, job.timeout).await;
        let elapsed = started.elapsed();

        let duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        let finished_at = TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);

        // Re-read on every finalization so operators can retune a live queue.
        let policy = RetryPolicy::load(&self.store);
        let finalization =
            match StateMachine::finalize(&job, &outcome, &policy, duration_ms, finished_at) {
                Ok(fin) => fin,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "cannot finalize job");
                    return None;
                }
            };

        if let Err(e) = self.store.finalize(&finalization) {
            error!(job_id = %job.id, error = %e, "failed to record job result");
            return None;
        }

        log_result(&job, &finalization, outcome.failure());
        Some(finalization)
    }

    // Store errors here are transient by assumption: log and treat as idle.
    fn claim(&self, now: DateTime<Utc>) -> Option<Job> {
        match self.store.claim_next(now) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "claim failed, will retry");
                None
            }
        }
    }
}

fn log_result(job: &Job, fin: &Finalization, failure: Option<FailureKind>) {
    let reason = failure.map(|f| f.to_string()).unwrap_or_default();
    match &fin.transition {
        Transition::Complete => {
            info!(job_id = %job.id, duration_ms = fin.duration_ms, "job completed");
        }
        Transition::Retry {
            attempts,
            delay_secs,
            ..
        } => {
            warn!(
                job_id = %job.id,
                attempts,
                max_retries = job.max_retries,
                delay_secs,
                %reason,
                "job failed, retry scheduled"
            );
        }
        Transition::DeadLetter { attempts } => {
            warn!(job_id = %job.id, attempts, %reason, "job moved to dead letter queue");
        }
    }
    debug!(job_id = %job.id, output_len = fin.output.len(), "result recorded");
}

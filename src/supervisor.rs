//! Worker pool supervision and the PID-file liveness marker.
//!
//! The supervisor runs in the foreground of `queuectl worker start`. It
//! re-executes the current binary once per worker, waits for a termination
//! signal, forwards SIGTERM to every worker, and gives them a fixed grace
//! period before exiting. Workers still running at that point are killed.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::QueueError;

/// File holding the supervisor's PID while it runs.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded PID, if the file exists and holds a number.
    pub fn read(&self) -> Result<Option<i32>, QueueError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match contents.trim().parse::<i32>() {
                Ok(pid) => Ok(Some(pid)),
                Err(_) => {
                    warn!(path = %self.path.display(), "ignoring malformed PID file");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, pid: u32) -> Result<(), QueueError> {
        std::fs::write(&self.path, pid.to_string())?;
        Ok(())
    }

    pub fn remove(&self) -> Result<(), QueueError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The recorded PID, only if that process is still alive.
    pub fn running_pid(&self) -> Result<Option<i32>, QueueError> {
        Ok(self.read()?.filter(|pid| is_process_running(*pid)))
    }
}

/// Probe a PID with signal 0.
pub fn is_process_running(pid: i32) -> bool {
    // 0 and negatives address process groups, never a single supervisor.
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        // Alive but owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    /// Re-run this binary with `args`.
    pub fn current_exe(args: Vec<OsString>) -> Result<Self, QueueError> {
        Ok(Self {
            program: std::env::current_exe()?,
            args,
        })
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Result of `worker stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The PID file pointed at a dead process and was removed.
    Stale { pid: i32 },
    /// SIGTERM delivered; the supervisor shuts down on its own.
    Signalled { pid: i32 },
}

pub struct Supervisor {
    pid_file: PidFile,
    grace: Duration,
}

impl Supervisor {
    pub fn new(pid_file: PidFile, grace: Duration) -> Self {
        Self { pid_file, grace }
    }

    /// Spawn `count` workers and block until shutdown.
    ///
    /// Returns early if every worker exits by itself.
    pub async fn start(&self, count: usize, worker: &WorkerCommand) -> Result<(), QueueError> {
        if let Some(pid) = self.pid_file.running_pid()? {
            return Err(QueueError::AlreadyRunning { pid });
        }

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        self.pid_file.write(std::process::id())?;
        info!(pid = std::process::id(), count, "starting workers");

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            match worker.spawn() {
                Ok(child) => {
                    info!(worker = index, child_pid = ?child.id(), "worker spawned");
                    workers.push(child);
                }
                Err(e) => {
                    self.pid_file.remove()?;
                    terminate_all(&workers);
                    return Err(e.into());
                }
            }
        }

        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = wait_all(&mut workers) => {
                info!("all workers exited");
                self.pid_file.remove()?;
                return Ok(());
            }
        };

        info!(signal = received, "shutting down all workers");
        self.pid_file.remove()?;
        terminate_all(&workers);

        // Bounded shutdown: stragglers are killed when `workers` is dropped.
        sleep(self.grace).await;
        info!(grace_ms = self.grace.as_millis() as u64, "grace period elapsed, exiting");
        Ok(())
    }

    /// Signal a running supervisor without waiting for it to exit.
    pub fn stop(&self) -> Result<StopOutcome, QueueError> {
        let Some(pid) = self.pid_file.read()? else {
            return Ok(StopOutcome::NotRunning);
        };

        if !is_process_running(pid) {
            self.pid_file.remove()?;
            return Ok(StopOutcome::Stale { pid });
        }

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => Ok(StopOutcome::Signalled { pid }),
            Err(Errno::ESRCH) => {
                self.pid_file.remove()?;
                Ok(StopOutcome::Stale { pid })
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn wait_all(workers: &mut [Child]) {
    for child in workers.iter_mut() {
        match child.wait().await {
            Ok(status) => info!(child_pid = ?child.id(), %status, "worker exited"),
            Err(e) => warn!(error = %e, "failed to wait for worker"),
        }
    }
}

fn terminate_all(workers: &[Child]) {
    for child in workers {
        let Some(id) = child.id() else { continue };
        let Ok(raw) = i32::try_from(id) else { continue };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!(child_pid = id, error = %e, "failed to signal worker");
        }
    }
}

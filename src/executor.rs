//! Shell command execution with an optional wall-clock timeout.

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::state_machine::ExecutionOutcome;

/// Runs a job's command and reports what happened.
///
/// Implementations never return an error: spawn failures and timeouts are
/// failed outcomes like any other.
pub trait CommandExecutor {
    fn execute(
        &self,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> impl Future<Output = ExecutionOutcome>;
}

/// Executes commands through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str, timeout_secs: Option<u64>) -> ExecutionOutcome {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "failed to spawn command");
                return ExecutionOutcome::failed(String::new(), e.to_string());
            }
        };

        // A timeout of 0 means "no limit".
        let limit = timeout_secs.filter(|secs| *secs > 0);
        let captured = match capture(child, limit.map(Duration::from_secs)).await {
            Ok(captured) => captured,
            Err(e) => return ExecutionOutcome::failed(String::new(), e.to_string()),
        };

        let stdout = String::from_utf8_lossy(&captured.stdout).to_string();
        let stderr = String::from_utf8_lossy(&captured.stderr).to_string();
        match (captured.status, limit) {
            (Some(status), _) => {
                debug!(command, %status, "command exited");
                if status.success() {
                    ExecutionOutcome::succeeded(stdout, stderr)
                } else if stderr.is_empty() {
                    ExecutionOutcome::failed(stdout, format!("Command exited with {status}"))
                } else {
                    ExecutionOutcome::failed(stdout, stderr)
                }
            }
            (None, secs) => {
                debug!(command, stdout_len = stdout.len(), "command timed out");
                ExecutionOutcome::timed_out(stdout, secs.unwrap_or_default())
            }
        }
    }
}

/// Output read from a child. `status` is `None` when the deadline passed first.
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<ExitStatus>,
}

enum Event {
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
    Exited(io::Result<ExitStatus>),
    Deadline,
}

/// Drain both pipes and wait for exit, keeping whatever was read if `limit`
/// expires. On expiry the child is killed.
async fn capture(mut child: Child, limit: Option<Duration>) -> io::Result<Captured> {
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut captured = Captured {
        stdout: Vec::new(),
        stderr: Vec::new(),
        status: None,
    };
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        let pipes_open = stdout_pipe.is_some() || stderr_pipe.is_some();
        let event = tokio::select! {
            read = read_chunk(&mut stdout_pipe, &mut out_buf) => Event::Stdout(read),
            read = read_chunk(&mut stderr_pipe, &mut err_buf) => Event::Stderr(read),
            status = child.wait(), if !pipes_open => Event::Exited(status),
            _ = &mut deadline => Event::Deadline,
        };

        match event {
            Event::Stdout(Ok(n)) if n > 0 => captured.stdout.extend_from_slice(&out_buf[..n]),
            Event::Stdout(_) => stdout_pipe = None,
            Event::Stderr(Ok(n)) if n > 0 => captured.stderr.extend_from_slice(&err_buf[..n]),
            Event::Stderr(_) => stderr_pipe = None,
            Event::Exited(status) => {
                captured.status = Some(status?);
                return Ok(captured);
            }
            Event::Deadline => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill timed out command");
                }
                return Ok(captured);
            }
        }
    }
}

/// Read from an open pipe; a closed pipe never completes.
async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

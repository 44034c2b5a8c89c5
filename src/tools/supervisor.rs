//! Subprocess supervisor
//!
//! Runs tool subprocesses with:
//! - A semaphore bounding how many run at once
//! - Each child placed in its own process group
//! - A hard per-call timeout; on expiry the whole group gets SIGKILL and the
//!   leader is reaped before the call returns. The same deadline bounds
//!   draining stdout/stderr after the leader exits, since a descendant that
//!   left the group can keep the pipes open
//! - Output capture capped at the configured size

use crate::errors::{EngineError, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Bounded, timeout-enforcing process runner
#[derive(Debug)]
pub struct ProcessSupervisor {
    /// Semaphore for concurrency control
    permits: Arc<Semaphore>,

    /// Per-stream capture limit (bytes)
    max_output_size: usize,
}

impl ProcessSupervisor {
    pub fn new(max_parallel: usize, max_output_size: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_parallel)),
            max_output_size,
        }
    }

    /// Run `command` to completion or until `timeout` elapses.
    ///
    /// Waiting for a permit does not count against the timeout.
    pub async fn run(&self, mut command: Command, timeout: Duration) -> Result<ProcessOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::Generic("process supervisor is shut down".to_string()))?;

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Execution(format!("Failed to spawn process: {}", e)))?;
        let pid = child.id();
        debug!(?pid, "process spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_size;
        let mut stdout_reader = tokio::spawn(read_capped(stdout, limit));
        let mut stderr_reader = tokio::spawn(read_capped(stderr, limit));

        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                // stragglers left in the group would hold the pipes open
                kill_process_group(pid);
                let drained = tokio::time::timeout_at(deadline, async {
                    tokio::join!(&mut stdout_reader, &mut stderr_reader)
                })
                .await;
                let Ok((stdout, stderr)) = drained else {
                    warn!(?pid, timeout_secs = timeout.as_secs(), "output still open at deadline");
                    stdout_reader.abort();
                    stderr_reader.abort();
                    return Err(EngineError::Timeout {
                        seconds: timeout.as_secs().max(1),
                    });
                };
                Ok(ProcessOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: stdout.unwrap_or_default(),
                    stderr: stderr.unwrap_or_default(),
                    duration: start.elapsed(),
                })
            }
            Ok(Err(e)) => {
                kill_process_group(pid);
                stdout_reader.abort();
                stderr_reader.abort();
                Err(EngineError::Execution(format!("Failed to wait for process: {}", e)))
            }
            Err(_) => {
                warn!(?pid, timeout_secs = timeout.as_secs(), "process timed out, killing group");
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "child already gone after group kill");
                }
                stdout_reader.abort();
                stderr_reader.abort();
                Err(EngineError::Timeout {
                    seconds: timeout.as_secs().max(1),
                })
            }
        }
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let Ok(pgid) = libc::pid_t::try_from(pid) else { return };
    // ESRCH (group already empty) is expected after a clean exit
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Read a stream to the end, keeping at most `limit` bytes
async fn read_capped<R>(stream: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };

    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    let mut truncated = false;
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if room < n {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    text
}

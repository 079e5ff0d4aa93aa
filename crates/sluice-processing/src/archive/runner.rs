//! Runs the zip-metadata program against one upload.
//!
//! The child gets its own process group. Its stdout is handed to a consumer
//! while it is still running (the consumer usually streams it into storage),
//! its stderr goes to the log, and the whole group is sent `SIGTERM` when the
//! run ends, whichever way it ends.

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use sluice_core::RequestContext;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use uuid::Uuid;

use super::outcome::{FailureKind, ZipOutcome};
use crate::error::ProcessingError;
use crate::metrics::MetricsSink;

/// What one finished invocation produced.
#[derive(Debug)]
pub struct ZipRun<T> {
    pub outcome: ZipOutcome,
    /// Whatever the stdout consumer returned.
    pub output: T,
}

/// Sends `SIGTERM` to a whole process group when dropped.
struct ProcessGroupGuard {
    pgid: Option<libc::pid_t>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    fn pgid(&self) -> Option<libc::pid_t> {
        self.pgid
    }

    fn terminate(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid);
        }
    }
}

fn signal_group(pgid: libc::pid_t) {
    // SAFETY: killpg only sends a signal. The group id is the pid of a
    // child spawned with process_group(0), so it names that child's group
    // and nothing older.
    let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group already exited.
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid = pgid, error = %err, "Failed to signal process group");
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

enum Finished<T> {
    Exited {
        consumed: Result<T, ProcessingError>,
        status: std::io::Result<ExitStatus>,
    },
    Cancelled,
    TimedOut(Duration),
}

pub struct ZipMetadataRunner {
    command: String,
    timeout: Option<Duration>,
    metrics: Arc<dyn MetricsSink>,
}

impl ZipMetadataRunner {
    /// `timeout` bounds a single run independently of the request deadline.
    pub fn new(
        command: impl Into<String>,
        timeout: Option<Duration>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            command: command.into(),
            timeout,
            metrics,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the program with `locator` as its only argument.
    ///
    /// `consume` receives stdout immediately after spawn and runs
    /// concurrently with the child, so output larger than the pipe buffer
    /// never stalls it. Stdout is closed as soon as `consume` returns, and
    /// a failing `consume` also terminates the process group. The outcome metric is recorded exactly once per call,
    /// including when the program cannot be started.
    pub async fn run<F, Fut, T>(
        &self,
        ctx: &RequestContext,
        locator: &str,
        consume: F,
    ) -> Result<ZipRun<T>, ProcessingError>
    where
        F: FnOnce(ChildStdout) -> Fut,
        Fut: Future<Output = Result<T, ProcessingError>>,
    {
        let unknown = ZipOutcome::Other(FailureKind::Unknown);

        let mut child = match Command::new(&self.command)
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.metrics.record_zip_outcome(unknown.label());
                tracing::error!(
                    request_id = %ctx.request_id(),
                    command = %self.command,
                    error = %e,
                    "Failed to start zip metadata command"
                );
                return Err(ProcessingError::Spawn {
                    command: self.command.clone(),
                    source: e,
                });
            }
        };

        let mut group = ProcessGroupGuard::new(child.id());
        let start = std::time::Instant::now();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(
                stderr,
                self.command.clone(),
                ctx.request_id(),
            ));
        }

        let Some(stdout) = child.stdout.take() else {
            self.metrics.record_zip_outcome(unknown.label());
            return Err(ProcessingError::Io(std::io::Error::other(
                "zip metadata command has no stdout pipe",
            )));
        };

        let timeout = self.timeout;
        let pgid = group.pgid();
        let finished = {
            let work = async {
                let consumed = consume(stdout).await;
                if consumed.is_err() {
                    // Stdout is closed and nothing will read the rest.
                    if let Some(pgid) = pgid {
                        signal_group(pgid);
                    }
                }
                (consumed, child.wait().await)
            };
            let deadline = async move {
                match timeout {
                    Some(t) => tokio::time::sleep(t).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = ctx.cancelled() => Finished::Cancelled,
                _ = deadline => Finished::TimedOut(timeout.unwrap_or_default()),
                (consumed, status) = work => Finished::Exited { consumed, status },
            }
        };

        match finished {
            Finished::Cancelled => {
                group.terminate();
                let _ = child.kill().await;
                self.metrics.record_zip_outcome(unknown.label());

                tracing::debug!(
                    request_id = %ctx.request_id(),
                    command = %self.command,
                    "Zip metadata command cancelled with request"
                );
                Err(ProcessingError::ContextEnded)
            }
            Finished::TimedOut(timeout) => {
                group.terminate();
                let _ = child.kill().await;
                self.metrics.record_zip_outcome(unknown.label());

                tracing::warn!(
                    request_id = %ctx.request_id(),
                    command = %self.command,
                    timeout_secs = timeout.as_secs(),
                    "Zip metadata command timed out"
                );
                Err(ProcessingError::Timeout {
                    command: self.command.clone(),
                    timeout,
                })
            }
            Finished::Exited { consumed, status } => {
                let outcome = match &status {
                    Ok(status) => ZipOutcome::from_exit_status(*status),
                    Err(_) => unknown,
                };
                self.metrics.record_zip_outcome(outcome.label());

                tracing::info!(
                    request_id = %ctx.request_id(),
                    command = %self.command,
                    outcome = outcome.label(),
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Zip metadata command finished"
                );

                let output = consumed?;
                status?;
                Ok(ZipRun { outcome, output })
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, command: String, request_id: Uuid) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(
                request_id = %request_id,
                command = %command,
                line = %line,
                "zip metadata stderr"
            ),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, command = %command, "Stopped reading stderr");
                break;
            }
        }
    }
}

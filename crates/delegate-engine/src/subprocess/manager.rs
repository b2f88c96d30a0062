//! Child process supervision for one attempt.
//!
//! Spawns the child, reads stdout line by line, accumulates stderr, and on
//! cancellation terminates the child (SIGTERM, grace period, SIGKILL).
//! Exit of the child ends the attempt even when a background process it
//! left behind keeps stdout open.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::{AttemptExecutor, ExitReport, LaunchSpec, ProcessExit, SpawnError};

/// How long to keep draining stderr after the child has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to keep reading stdout once the child itself has exited.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// [`AttemptExecutor`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// Timeout for graceful termination before SIGKILL.
    terminate_timeout: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessExecutor {
    pub const fn new(terminate_timeout: Duration) -> Self {
        Self { terminate_timeout }
    }

    pub const fn terminate_timeout(&self) -> Duration {
        self.terminate_timeout
    }

    fn command(spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Ask the child to stop, escalating to SIGKILL after the timeout.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid comes from our own live Child handle; kill(2)
                // with SIGTERM has no memory-safety preconditions.
                #[allow(unsafe_code)]
                #[allow(clippy::cast_possible_wrap)]
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    let err = std::io::Error::last_os_error();
                    warn!(pid, error = %err, "Failed to send SIGTERM");
                }
            }
        }

        match tokio::time::timeout(self.terminate_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(?status, "Child exited after SIGTERM"),
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for child, killing");
                child.kill().await.ok();
            }
            Err(_) => {
                warn!("Timeout waiting for graceful shutdown, killing");
                child.kill().await.ok();
            }
        }
    }
}

fn spawn_stderr_reader<R>(stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut captured = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("child stderr: {}", line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

async fn collect_stderr(task: Option<JoinHandle<String>>, interrupted: bool) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    if interrupted {
        task.abort();
        return String::new();
    }
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "stderr reader failed");
            String::new()
        }
        Err(_) => {
            // A grandchild may still hold the pipe open.
            task.abort();
            String::new()
        }
    }
}

/// Read what is left on stdout after the child exited. Returns true when
/// cancellation fired while draining.
async fn drain_stdout(
    lines: &mut Lines<BufReader<ChildStdout>>,
    on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    cancel: &CancellationToken,
) -> bool {
    let drain = async {
        while let Ok(Some(line)) = lines.next_line().await {
            on_line(&line);
        }
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        drained = tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, drain) => {
            if drained.is_err() {
                warn!("Child exited with stdout still held open, abandoning it");
            }
            false
        }
    }
}

#[async_trait]
impl AttemptExecutor for ProcessExecutor {
    async fn run_attempt(
        &self,
        spec: &LaunchSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExitReport, SpawnError> {
        info!(
            program = %spec.program.display(),
            arg_count = spec.args.len(),
            "Spawning subagent child"
        );
        let mut child = Self::command(spec).spawn().map_err(|e| SpawnError::Spawn {
            program: spec.program.display().to_string(),
            source: e,
        })?;
        let pid = child.id();

        // Dropping `child` on an early return kills it (kill_on_drop).
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr_task = child.stderr.take().map(spawn_stderr_reader);

        let mut lines = BufReader::new(stdout).lines();
        let mut early_exit = None;
        let mut interrupted = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break true,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => on_line(&line),
                    Ok(None) => break false,
                    Err(e) => {
                        warn!(?pid, error = %e, "Failed to read child stdout");
                        break false;
                    }
                },
                status = child.wait() => {
                    early_exit = Some(status);
                    break false;
                }
            }
        };
        let exited = early_exit.is_some();
        if exited {
            interrupted = drain_stdout(&mut lines, on_line, cancel).await;
        }
        drop(lines);

        let exit = if interrupted {
            None
        } else if let Some(status) = early_exit {
            Some(status)
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                status = child.wait() => Some(status),
            }
        };

        let exit = match exit {
            None => {
                interrupted = true;
                if !exited {
                    info!(?pid, "Cancellation requested, terminating child");
                    self.terminate(&mut child).await;
                }
                ProcessExit::Interrupted
            }
            Some(Ok(status)) => {
                debug!(?pid, ?status, "Child exited");
                ProcessExit::Exited {
                    code: status.code(),
                }
            }
            Some(Err(e)) => {
                warn!(?pid, error = %e, "Failed to wait for child");
                child.kill().await.ok();
                ProcessExit::Exited { code: None }
            }
        };

        let stderr = collect_stderr(stderr_task, interrupted).await;
        Ok(ExitReport { exit, stderr })
    }
}

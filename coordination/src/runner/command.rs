//! Sandboxed command execution with hard timeouts
//!
//! Every invocation gets its own process group so that a timeout or a
//! cancellation kills the whole tree (test binaries, shells, background
//! jobs), not only the direct child.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::capture::BoundedCapture;
use super::result::{ExecutionResult, Outcome, Termination};

/// Environment variables every child inherits.
const BASE_ENV: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

/// Configuration for the command runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Per-stream capture limit in bytes
    pub output_limit_bytes: usize,
    /// How long to wait for pipes to close after the group is killed
    pub reap_grace_ms: u64,
    /// Extra environment variables passed through from the engine process
    pub env_passthrough: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 64 * 1024,
            reap_grace_ms: 500,
            env_passthrough: Vec::new(),
        }
    }
}

/// Kills the child's process group when dropped.
///
/// Dropping the future that owns a running invocation (e.g. a cancelled
/// step) must not leave the tree behind.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => debug!(pgid, "process group killed"),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(pgid, error = %e, "failed to kill process group"),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Stateless runner for arbitrary build/test/PoC commands.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `argv` inside `workdir`.
    ///
    /// Never returns later than `timeout` plus the reap grace. The result is
    /// always terminal; failures to start are reported as `Crashed`.
    pub async fn run(
        &self,
        workdir: &Path,
        argv: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let Some((program, args)) = argv.split_first() else {
            return ExecutionResult::spawn_failed(argv, "empty argv", started_at);
        };
        if cancel.is_cancelled() {
            let mut result = ExecutionResult::spawn_failed(argv, "cancelled", started_at);
            result.termination = Some(Termination::Cancelled);
            return result;
        }

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(workdir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in BASE_ENV
            .iter()
            .copied()
            .chain(self.config.env_passthrough.iter().map(String::as_str))
        {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::spawn_failed(argv, e.to_string(), started_at);
            }
        };
        let mut group = ProcessGroup::new(child.id());

        let stdout = BoundedCapture::new(self.config.output_limit_bytes);
        let stderr = BoundedCapture::new(self.config.output_limit_bytes);
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(stdout.clone().drain(pipe)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(stderr.clone().drain(pipe)));
        }

        let waited = tokio::select! {
            biased;
            status = child.wait() => Waited::Exited(status),
            _ = cancel.cancelled() => Waited::Cancelled,
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
        };

        // Descendants may outlive the leader; the group goes in every case.
        group.kill();
        if !matches!(waited, Waited::Exited(_)) {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        let grace = Duration::from_millis(self.config.reap_grace_ms);
        for reader in readers {
            if tokio::time::timeout(grace, reader).await.is_err() {
                debug!("output reader still open after grace period");
            }
        }

        let (stdout_text, stdout_truncated) = stdout.snapshot();
        let (stderr_text, stderr_truncated) = stderr.snapshot();

        let (outcome, exit_code, termination) = match waited {
            Waited::Exited(Ok(status)) => match status.code() {
                Some(code) => (Outcome::Completed, Some(code), None),
                None => (Outcome::Crashed, None, Some(signal_of(&status))),
            },
            Waited::Exited(Err(e)) => (
                Outcome::Crashed,
                None,
                Some(Termination::SpawnFailed {
                    reason: format!("wait failed: {e}"),
                }),
            ),
            Waited::TimedOut => (Outcome::TimedOut, None, Some(Termination::Timeout)),
            Waited::Cancelled => (Outcome::Crashed, None, Some(Termination::Cancelled)),
        };

        let result = ExecutionResult {
            argv: argv.to_vec(),
            exit_code,
            stdout: stdout_text,
            stderr: stderr_text,
            stdout_truncated,
            stderr_truncated,
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
            termination,
            started_at,
        };

        debug!(
            program = %program,
            outcome = %result.outcome,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            "command finished"
        );
        result
    }
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Termination {
    use std::os::unix::process::ExitStatusExt;
    Termination::Signal {
        signal: status.signal().unwrap_or(0),
    }
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Termination {
    Termination::Signal { signal: 0 }
}

//! Execution results produced by the command runner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal classification of a command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The process exited on its own (any exit code).
    Completed,
    /// The hard timeout expired and the process group was killed.
    TimedOut,
    /// The process could not be spawned, died from a signal, or was cancelled.
    Crashed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

/// Why the runner terminated a process instead of letting it exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Hard timeout expired.
    Timeout,
    /// Ticket-level cancellation was requested.
    Cancelled,
    /// The child never started.
    SpawnFailed { reason: String },
    /// The child was killed by a signal it did not receive from the runner.
    Signal { signal: i32 },
}

/// Output of a single command invocation. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The argument vector that was executed
    pub argv: Vec<String>,
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Captured stdout (lossy UTF-8, bounded)
    pub stdout: String,
    /// Captured stderr (lossy UTF-8, bounded)
    pub stderr: String,
    /// Whether stdout exceeded the capture limit
    #[serde(default)]
    pub stdout_truncated: bool,
    /// Whether stderr exceeded the capture limit
    #[serde(default)]
    pub stderr_truncated: bool,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Terminal classification
    pub outcome: Outcome,
    /// Runner-initiated termination cause, if any
    #[serde(default)]
    pub termination: Option<Termination>,
    /// When the invocation started
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Result for an invocation that never started.
    pub fn spawn_failed(argv: &[String], reason: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            argv: argv.to_vec(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 0,
            outcome: Outcome::Crashed,
            termination: Some(Termination::SpawnFailed {
                reason: reason.into(),
            }),
            started_at,
        }
    }

    /// Completed with exit code 0.
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Completed && self.exit_code == Some(0)
    }

    /// Whether the runner killed this invocation because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        matches!(self.termination, Some(Termination::Cancelled))
    }

    /// Stdout followed by stderr, for signature matching.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// One-line human summary used in gate failure details.
    pub fn summary(&self) -> String {
        let program = self.argv.first().map(String::as_str).unwrap_or("<empty>");
        match (&self.outcome, &self.termination) {
            (Outcome::Completed, _) => format!(
                "`{}` exited {} after {}ms",
                program,
                self.exit_code.map_or_else(|| "?".to_string(), |c| c.to_string()),
                self.duration_ms
            ),
            (Outcome::TimedOut, _) => {
                format!("`{}` timed out after {}ms", program, self.duration_ms)
            }
            (Outcome::Crashed, Some(Termination::SpawnFailed { reason })) => {
                format!("`{}` failed to start: {}", program, reason)
            }
            (Outcome::Crashed, Some(Termination::Signal { signal })) => {
                format!("`{}` killed by signal {}", program, signal)
            }
            (Outcome::Crashed, Some(Termination::Cancelled)) => {
                format!("`{}` cancelled after {}ms", program, self.duration_ms)
            }
            (Outcome::Crashed, _) => format!("`{}` crashed", program),
        }
    }
}

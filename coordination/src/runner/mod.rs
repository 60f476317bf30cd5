//! CommandRunner: sandboxed execution of build, test and PoC commands
//!
//! Turns an arbitrary argument vector into a structured [`ExecutionResult`]:
//!
//! - hard per-command timeout with process-group termination
//! - bounded stdout/stderr capture, partial output kept on timeout
//! - cleared environment, null stdin, workspace as working directory
//! - cooperative cancellation through a `CancellationToken`

pub mod capture;
pub mod command;
pub mod result;

pub use capture::BoundedCapture;
pub use command::{CommandRunner, RunnerConfig};
pub use result::{ExecutionResult, Outcome, Termination};

//! Isolated per-reviewer workspaces
//!
//! Every (ticket, reviewer, step) gets its own copy of the codebase,
//! either a detached git worktree or a plain directory copy. A
//! [`WorkspaceLease`] owns the copy and removes it on release or drop.

mod apply;
pub mod context;
pub mod copy;
pub mod git;
pub mod manager;

use std::path::PathBuf;

pub use manager::{Workspace, WorkspaceKey, WorkspaceLease, WorkspaceManager, WorkspaceSource};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// The workspace could not be created or populated
    #[error("workspace provisioning failed for {key}: {reason}")]
    Provisioning { key: String, reason: String },

    #[error("workspace teardown failed at {path}: {reason}")]
    Teardown { path: PathBuf, reason: String },

    #[error("patch rejected: {0}")]
    PatchRejected(String),

    #[error("path outside workspace: {0}")]
    OutsideWorkspace(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

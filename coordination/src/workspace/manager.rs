//! Workspace lifecycle: acquire, populate, release

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{apply, context, copy, git, WorkspaceError};
use crate::scoring::PatchSides;
use crate::ticket::types::{is_contained_path, sanitize_component};
use crate::ticket::{CodeLocation, PatchSet, ReviewerId, TicketId};

/// Identity of one workspace: one reviewer doing one step on one ticket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKey {
    pub ticket: TicketId,
    pub reviewer: ReviewerId,
    pub step: String,
}

impl WorkspaceKey {
    pub fn new(ticket: impl Into<TicketId>, reviewer: &ReviewerId, step: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            reviewer: reviewer.clone(),
            step: step.into(),
        }
    }

    fn dir_name(&self) -> String {
        format!(
            "{}-{}",
            self.reviewer.path_component(),
            sanitize_component(&self.step)
        )
    }
}

impl std::fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.ticket, self.reviewer, self.step)
    }
}

/// Where workspaces are populated from
#[derive(Debug, Clone)]
pub enum WorkspaceSource {
    /// Detached `git worktree` of a repository
    GitWorktree { repo_root: PathBuf },
    /// File copy of a plain directory
    Directory { root: PathBuf },
}

/// A populated, isolated copy of the codebase
#[derive(Debug, Clone)]
pub struct Workspace {
    pub key: WorkspaceKey,
    pub root: PathBuf,
    /// Commit id for worktrees, the requested ref otherwise
    pub source_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Removes the workspace's storage.
#[derive(Debug)]
struct Teardown {
    root: PathBuf,
    repo_root: Option<PathBuf>,
}

impl Teardown {
    fn run(&self) -> anyhow::Result<()> {
        if let Some(repo_root) = &self.repo_root {
            git::remove(repo_root, &self.root)?;
        }
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove {}", self.root.display()))?;
        }
        if let Some(repo_root) = &self.repo_root {
            git::prune(repo_root)?;
        }
        Ok(())
    }
}

/// Exclusive ownership of a workspace
///
/// Storage is removed by [`WorkspaceManager::release`] or, failing that,
/// when the lease is dropped.
#[derive(Debug)]
pub struct WorkspaceLease {
    workspace: Workspace,
    teardown: Option<Teardown>,
}

impl WorkspaceLease {
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn root(&self) -> &Path {
        &self.workspace.root
    }

    pub fn key(&self) -> &WorkspaceKey {
        &self.workspace.key
    }

    /// Not yet released and still on disk.
    pub fn is_live(&self) -> bool {
        self.teardown.is_some() && self.workspace.root.exists()
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            if let Err(e) = teardown.run() {
                let reason = format!("{e:#}");
                warn!(workspace = %self.workspace.key, error = %reason, "workspace teardown failed");
            }
        }
    }
}

/// Creates and destroys isolated workspaces under one base directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
    source: WorkspaceSource,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>, source: WorkspaceSource) -> Result<Self, WorkspaceError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| WorkspaceError::Io {
            path: base_dir.clone(),
            source,
        })?;
        let base_dir = fs::canonicalize(&base_dir).map_err(|source| WorkspaceError::Io {
            path: base_dir.clone(),
            source,
        })?;

        match &source {
            WorkspaceSource::GitWorktree { repo_root } => {
                git::verify_repo(repo_root).map_err(|e| WorkspaceError::Provisioning {
                    key: repo_root.display().to_string(),
                    reason: format!("{e:#}"),
                })?;
            }
            WorkspaceSource::Directory { root } if !root.is_dir() => {
                return Err(WorkspaceError::Provisioning {
                    key: root.display().to_string(),
                    reason: "source directory does not exist".to_string(),
                });
            }
            WorkspaceSource::Directory { .. } => {}
        }

        Ok(Self { base_dir, source })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn source(&self) -> &WorkspaceSource {
        &self.source
    }

    /// Deterministic location for `key`.
    pub fn path_for(&self, key: &WorkspaceKey) -> PathBuf {
        self.base_dir
            .join(sanitize_component(&key.ticket))
            .join(key.dir_name())
    }

    /// Provision a fresh workspace for `key` forked at `source_ref`.
    ///
    /// Leftovers from a previous holder of the same key are purged first.
    pub async fn acquire(
        &self,
        key: WorkspaceKey,
        source_ref: &str,
    ) -> Result<WorkspaceLease, WorkspaceError> {
        let root = self.path_for(&key);
        let source = self.source.clone();
        let requested = source_ref.to_string();
        let target = root.clone();

        let provisioned =
            tokio::task::spawn_blocking(move || provision(&source, &target, &requested)).await;
        let source_ref = match provisioned {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                let reason = format!("{e:#}");
                warn!(workspace = %key, error = %reason, "workspace provisioning failed");
                return Err(WorkspaceError::Provisioning {
                    key: key.to_string(),
                    reason,
                });
            }
            Err(join) => {
                return Err(WorkspaceError::Provisioning {
                    key: key.to_string(),
                    reason: format!("provisioning task failed: {join}"),
                });
            }
        };

        debug!(workspace = %key, root = %root.display(), "workspace acquired");
        let repo_root = match &self.source {
            WorkspaceSource::GitWorktree { repo_root } => Some(repo_root.clone()),
            WorkspaceSource::Directory { .. } => None,
        };
        Ok(WorkspaceLease {
            teardown: Some(Teardown {
                root: root.clone(),
                repo_root,
            }),
            workspace: Workspace {
                key,
                root,
                source_ref,
                created_at: Utc::now(),
            },
        })
    }

    /// Tear the workspace down now instead of on drop.
    pub async fn release(&self, mut lease: WorkspaceLease) -> Result<(), WorkspaceError> {
        let Some(teardown) = lease.teardown.take() else {
            return Ok(());
        };
        let key = lease.workspace.key.to_string();
        let root = teardown.root.clone();
        match tokio::task::spawn_blocking(move || teardown.run()).await {
            Ok(Ok(())) => {
                debug!(workspace = %key, "workspace released");
                Ok(())
            }
            Ok(Err(e)) => Err(WorkspaceError::Teardown {
                path: root,
                reason: format!("{e:#}"),
            }),
            Err(join) => Err(WorkspaceError::Teardown {
                path: root,
                reason: join.to_string(),
            }),
        }
    }

    /// Apply a candidate patch inside the lease's workspace, returning the
    /// code it replaced and introduced.
    pub async fn apply_patch(
        &self,
        lease: &WorkspaceLease,
        patch: &PatchSet,
    ) -> Result<PatchSides, WorkspaceError> {
        let root = lease.root().to_path_buf();
        let patch = patch.clone();
        tokio::task::spawn_blocking(move || apply::apply_patch_set(&root, &patch))
            .await
            .map_err(|join| WorkspaceError::PatchRejected(join.to_string()))?
    }

    /// The flagged section of the codebase with `radius` lines of context.
    pub async fn code_excerpt(
        &self,
        lease: &WorkspaceLease,
        location: &CodeLocation,
        radius: u32,
    ) -> Result<String, WorkspaceError> {
        if !is_contained_path(&location.file) {
            return Err(WorkspaceError::OutsideWorkspace(location.file.clone()));
        }
        let path = lease.root().join(&location.file);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| WorkspaceError::Io { path, source })?;
        Ok(context::render_excerpt(
            &String::from_utf8_lossy(&bytes),
            location,
            radius,
        ))
    }
}

/// Purge anything at `root`, then populate it. Returns the recorded ref.
fn provision(source: &WorkspaceSource, root: &Path, source_ref: &str) -> anyhow::Result<String> {
    let parent = root
        .parent()
        .context("workspace path has no parent directory")?;
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .context("workspace path has no file name")?
        .to_string();

    match source {
        WorkspaceSource::GitWorktree { repo_root } => {
            if root.exists() {
                info!(root = %root.display(), "purging leftover worktree");
                let _ = git::remove(repo_root, root);
                if root.exists() {
                    fs::remove_dir_all(root)
                        .with_context(|| format!("Failed to purge {}", root.display()))?;
                }
            }
            git::prune(repo_root)?;

            let commit = git::resolve_ref(repo_root, source_ref)?;
            if let Err(e) = git::add_detached(repo_root, root, &commit) {
                let _ = fs::remove_dir_all(root);
                let _ = git::prune(repo_root);
                return Err(e);
            }
            Ok(commit)
        }
        WorkspaceSource::Directory { root: src } => {
            purge_staging(parent, &name);
            if root.exists() {
                info!(root = %root.display(), "purging leftover workspace");
                fs::remove_dir_all(root)
                    .with_context(|| format!("Failed to purge {}", root.display()))?;
            }

            let staging = parent.join(format!(".{name}.staging-{}", uuid::Uuid::new_v4()));
            if let Err(e) = copy::copy_tree(src, &staging) {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
            fs::rename(&staging, root).with_context(|| {
                format!("Failed to move staged workspace into {}", root.display())
            })?;
            Ok(source_ref.to_string())
        }
    }
}

/// Remove half-populated staging directories left by an interrupted acquire.
fn purge_staging(parent: &Path, name: &str) {
    let prefix = format!(".{name}.staging-");
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let _ = fs::remove_dir_all(entry.path());
        }
    }
}

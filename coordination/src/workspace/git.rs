//! Git worktree plumbing
//!
//! Thin wrappers over the `git` CLI. Blocking; callers on the async side go
//! through `spawn_blocking`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};

/// Serializes worktree administration; concurrent `add`/`prune` on one
/// repository race on `.git/worktrees`.
static WORKTREE_ADMIN: Mutex<()> = Mutex::new(());

fn admin_lock() -> MutexGuard<'static, ()> {
    WORKTREE_ADMIN.lock().unwrap_or_else(|e| e.into_inner())
}

fn git(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir).stdin(Stdio::null());
    cmd
}

/// Fail unless `repo_root` is inside a git repository.
pub fn verify_repo(repo_root: &Path) -> Result<()> {
    let output = git(repo_root)
        .args(["rev-parse", "--git-dir"])
        .output()
        .context("Failed to check git repo")?;
    if !output.status.success() {
        bail!("Not a git repository: {}", repo_root.display());
    }
    Ok(())
}

/// Resolve `source_ref` to a commit id.
pub fn resolve_ref(repo_root: &Path, source_ref: &str) -> Result<String> {
    let output = git(repo_root)
        .args(["rev-parse", "--verify", &format!("{source_ref}^{{commit}}")])
        .output()
        .context("Failed to run git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("cannot resolve {source_ref}: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Add a detached worktree at `path` checked out at `source_ref`.
pub fn add_detached(repo_root: &Path, path: &Path, source_ref: &str) -> Result<()> {
    let _admin = admin_lock();
    let output = git(repo_root)
        .args(["worktree", "add", "--detach", "--force"])
        .arg(path)
        .arg(source_ref)
        .output()
        .context("Failed to run git worktree add")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git worktree add failed: {}", stderr.trim());
    }
    Ok(())
}

/// Force-remove the worktree at `path`. Missing worktrees are not an error.
pub fn remove(repo_root: &Path, path: &Path) -> Result<()> {
    let _admin = admin_lock();
    let output = git(repo_root)
        .args(["worktree", "remove", "--force", "--force"])
        .arg(path)
        .output()
        .context("Failed to run git worktree remove")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("is not a working tree") {
            tracing::debug!("git worktree remove warning: {}", stderr.trim());
        }
    }
    Ok(())
}

/// Drop administrative entries for worktrees whose directories are gone.
pub fn prune(repo_root: &Path) -> Result<()> {
    let _admin = admin_lock();
    let output = git(repo_root)
        .args(["worktree", "prune"])
        .output()
        .context("Failed to run git worktree prune")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git worktree prune failed: {}", stderr.trim());
    }
    Ok(())
}

/// Paths of every worktree registered with the repository.
pub fn list(repo_root: &Path) -> Result<Vec<PathBuf>> {
    let output = git(repo_root)
        .args(["worktree", "list", "--porcelain"])
        .output()
        .context("Failed to list worktrees")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git worktree list failed: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect())
}

/// Apply a unified diff inside `workdir`. Works outside a repository too.
pub fn apply_diff(workdir: &Path, diff: &str) -> Result<()> {
    let mut cmd = git(workdir);
    // Paths must resolve against `workdir`, not an enclosing repository.
    if let Some(parent) = workdir.parent() {
        cmd.env("GIT_CEILING_DIRECTORIES", parent);
    }
    let mut child = cmd
        .args(["apply", "--whitespace=nowarn", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to run git apply")?;
    {
        let mut stdin = child.stdin.take().context("git apply stdin unavailable")?;
        stdin
            .write_all(diff.as_bytes())
            .context("Failed to write diff to git apply")?;
        if !diff.ends_with('\n') {
            stdin.write_all(b"\n").context("Failed to write diff to git apply")?;
        }
    }
    let output = child
        .wait_with_output()
        .context("Failed to wait for git apply")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git apply failed: {}", stderr.trim());
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_worktree_lifecycle() {
        let repo = tempdir().unwrap();
        testing::init_repo(repo.path());
        verify_repo(repo.path()).unwrap();
        assert_eq!(resolve_ref(repo.path(), "HEAD").unwrap().len(), 40);

        let base = tempdir().unwrap();
        let wt = base.path().join("wt");
        add_detached(repo.path(), &wt, "HEAD").unwrap();
        assert!(wt.join("vuln.c").exists());
        assert_eq!(list(repo.path()).unwrap().len(), 2);

        remove(repo.path(), &wt).unwrap();
        prune(repo.path()).unwrap();
        assert!(!wt.exists());
        assert_eq!(list(repo.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_not_a_repo() {
        let dir = tempdir().unwrap();
        assert!(verify_repo(dir.path()).is_err());
    }

    #[test]
    fn test_apply_diff_outside_repo() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";
        apply_diff(dir.path(), diff).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\nthree\n"
        );
        assert!(apply_diff(dir.path(), "not a diff").is_err());
    }
}

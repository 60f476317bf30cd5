//! Applying candidate patches to a workspace

use std::fs;
use std::path::Path;

use super::git;
use super::WorkspaceError;
use crate::scoring::PatchSides;
use crate::ticket::types::is_contained_path;
use crate::ticket::PatchSet;

/// Apply `patch` under `root` and return the code it replaced and
/// introduced. Blocking.
pub(crate) fn apply_patch_set(
    root: &Path,
    patch: &PatchSet,
) -> Result<PatchSides, WorkspaceError> {
    if patch.is_empty() {
        return Err(WorkspaceError::PatchRejected("empty patch".to_string()));
    }
    match patch {
        PatchSet::UnifiedDiff { diff } => {
            git::apply_diff(root, diff)
                .map_err(|e| WorkspaceError::PatchRejected(format!("{e:#}")))?;
            Ok(PatchSides::from_diff(diff))
        }
        PatchSet::FileReplacements { files } => {
            if let Some(bad) = files.keys().find(|p| !is_contained_path(p)) {
                return Err(WorkspaceError::PatchRejected(format!(
                    "path escapes workspace: {bad}"
                )));
            }
            let canonical_root = fs::canonicalize(root).map_err(|source| WorkspaceError::Io {
                path: root.to_path_buf(),
                source,
            })?;
            let mut sides = PatchSides::default();
            for (rel, content) in files {
                let target = root.join(rel);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|source| WorkspaceError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                    let resolved =
                        fs::canonicalize(parent).map_err(|source| WorkspaceError::Io {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                    if !resolved.starts_with(&canonical_root) {
                        return Err(WorkspaceError::PatchRejected(format!(
                            "path escapes workspace through a link: {rel}"
                        )));
                    }
                }
                let original = match fs::read_to_string(&target) {
                    Ok(text) => text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(source) => {
                        return Err(WorkspaceError::Io {
                            path: target.clone(),
                            source,
                        })
                    }
                };
                fs::write(&target, content).map_err(|source| WorkspaceError::Io {
                    path: target.clone(),
                    source,
                })?;
                sides.extend(&original, content);
            }
            Ok(sides)
        }
    }
}

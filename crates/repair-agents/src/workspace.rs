//! Working-tree patch application with all-or-nothing semantics.
//!
//! [`Workspace::apply`] snapshots every target file before writing. If any
//! write fails, everything already written is restored before the error is
//! returned, so the tree is either fully patched or untouched. A verified
//! patch is kept by dropping its [`AppliedPatch`]; a rejected one is undone
//! with [`Workspace::revert`].

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::ProposedPatch;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch contains no files")]
    Empty,

    #[error("patch path `{}` is outside the project root", path.display())]
    OutsideRoot { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

impl PatchError {
    /// Errors raised before the tree was touched
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Empty | Self::OutsideRoot { .. })
    }
}

/// Pre-patch state of one written file.
#[derive(Debug, Clone)]
struct Snapshot {
    path: PathBuf,
    /// `None` when the patch created the file
    previous: Option<String>,
}

/// Record of a patch that is on disk.
#[derive(Debug, Default)]
pub struct AppliedPatch {
    snapshots: Vec<Snapshot>,
    created_dirs: Vec<PathBuf>,
}

impl AppliedPatch {
    /// Absolute paths whose content changed, in patch order.
    pub fn modified_files(&self) -> Vec<PathBuf> {
        self.snapshots.iter().map(|s| s.path.clone()).collect()
    }

    /// Content before the patch, `None` for created files.
    pub fn previous_content(&self, path: &Path) -> Option<&str> {
        self.snapshots
            .iter()
            .find(|s| s.path == path)
            .and_then(|s| s.previous.as_deref())
    }

    pub fn is_noop(&self) -> bool {
        self.snapshots.is_empty()
    }
}

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for `path` if it stays inside the root.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, PatchError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize(&joined);
        let root = normalize(&self.root);
        let escapes = normalized
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if !escapes && normalized.starts_with(&root) && normalized != root {
            Ok(normalized)
        } else {
            Err(PatchError::OutsideRoot {
                path: path.to_path_buf(),
            })
        }
    }

    /// Path relative to the root, for prompts and logs.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Refuse patches that are empty or reach outside the root.
    pub fn check(&self, patch: &ProposedPatch) -> Result<(), PatchError> {
        self.targets(patch).map(|_| ())
    }

    fn targets<'p>(&self, patch: &'p ProposedPatch) -> Result<Vec<(PathBuf, &'p str)>, PatchError> {
        if patch.is_empty() {
            return Err(PatchError::Empty);
        }
        patch
            .files
            .iter()
            .map(|(path, content)| Ok((self.resolve(path)?, content.as_str())))
            .collect()
    }

    /// Write every file of `patch`. Paths are all checked before anything
    /// is written; files whose content is unchanged are skipped.
    pub fn apply(&self, patch: &ProposedPatch) -> Result<AppliedPatch, PatchError> {
        let targets = self.targets(patch)?;

        let mut applied = AppliedPatch::default();
        for (path, content) in targets {
            if let Err(e) = self.write_one(&path, content, &mut applied) {
                warn!(path = %path.display(), error = %e, "Patch write failed, rolling back");
                if let Err(revert_err) = self.revert(applied) {
                    warn!(error = %revert_err, "Rollback after failed write was incomplete");
                }
                return Err(e);
            }
        }

        debug!(files = applied.snapshots.len(), "Patch applied");
        Ok(applied)
    }

    fn write_one(
        &self,
        path: &Path,
        content: &str,
        applied: &mut AppliedPatch,
    ) -> Result<(), PatchError> {
        let previous = match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(PatchError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if previous.as_deref() == Some(content) {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            let mut missing = Vec::new();
            let mut dir = parent;
            while !dir.exists() {
                missing.push(dir.to_path_buf());
                match dir.parent() {
                    Some(p) => dir = p,
                    None => break,
                }
            }
            std::fs::create_dir_all(parent).map_err(|source| PatchError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
            // Shallowest first; revert walks the list backwards.
            applied.created_dirs.extend(missing.into_iter().rev());
        }

        // Record before writing so a partial write is also restored.
        applied.snapshots.push(Snapshot {
            path: path.to_path_buf(),
            previous,
        });
        std::fs::write(path, content).map_err(|source| PatchError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Restore every file of `applied` to its pre-patch state.
    ///
    /// Restoration continues past individual failures; the first error is
    /// returned once everything possible was restored.
    pub fn revert(&self, applied: AppliedPatch) -> Result<(), PatchError> {
        let mut first_error = None;

        for snapshot in applied.snapshots.iter().rev() {
            let result = match &snapshot.previous {
                Some(text) => std::fs::write(&snapshot.path, text),
                None => match std::fs::remove_file(&snapshot.path) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(source) = result {
                warn!(path = %snapshot.path.display(), error = %source, "Revert failed");
                first_error.get_or_insert(PatchError::Write {
                    path: snapshot.path.clone(),
                    source,
                });
            }
        }

        for dir in applied.created_dirs.iter().rev() {
            // Only empty directories go; anything else was not ours.
            let _ = std::fs::remove_dir(dir);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(files = applied.snapshots.len(), "Patch reverted");
                Ok(())
            }
        }
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching the
/// filesystem. A `..` that cannot be resolved is kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

//! Workspace boundary checks for file tools.
//!
//! Paths are normalized lexically (no filesystem access) so a target that does
//! not exist yet can still be checked. Symlinks inside the workspace are not
//! resolved.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("Permission denied: '{0}' is outside the workspace.")]
    OutsideWorkspace(String),
    #[error("Permission denied: '{0}' is a protected path.")]
    Protected(String),
}

/// Whether the operation modifies the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
    protected: Vec<PathBuf>,
}

impl WorkspaceGuard {
    pub fn new(root: impl Into<PathBuf>, protected_paths: &[String]) -> Self {
        let root = normalize(&root.into());
        let protected = protected_paths
            .iter()
            .map(|p| normalize(&root.join(p)))
            .collect();
        Self { root, protected }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path against the workspace root.
    pub fn resolve(&self, requested: &str, access: Access) -> Result<PathBuf, GuardError> {
        let joined = if Path::new(requested).is_absolute() {
            PathBuf::from(requested)
        } else {
            self.root.join(requested)
        };
        let resolved = normalize(&joined);
        if !resolved.starts_with(&self.root) {
            return Err(GuardError::OutsideWorkspace(requested.to_string()));
        }
        if access == Access::Write && self.is_protected(&resolved) {
            return Err(GuardError::Protected(requested.to_string()));
        }
        Ok(resolved)
    }

    /// True for a protected path itself, anything under it, and the
    /// workspace root (which contains them).
    pub fn is_protected(&self, path: &Path) -> bool {
        path == self.root || self.protected.iter().any(|p| path.starts_with(p))
    }
}

/// Collapse `.` and `..` without touching the filesystem. `..` never climbs
/// above the first component, so the result can be compared with `starts_with`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

//! Workspace root confinement for file-oriented tools

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Access denied: {0} is outside workspace")]
    OutsideWorkspace(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Failed to resolve {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A directory that tools may read and write inside, and nowhere else.
///
/// Paths are resolved against the canonical root, normalized lexically, then
/// checked again after following symlinks on the longest existing prefix. A
/// path that leaves the root either way is rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace, creating the root directory if needed
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path to an absolute path inside the root
    pub fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        if path.contains('\0') {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }

        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(SandboxError::OutsideWorkspace(path.to_string()));
        }

        let real = canonicalize_existing_prefix(&normalized).map_err(|source| SandboxError::Io {
            path: path.to_string(),
            source,
        })?;
        if !real.starts_with(&self.root) {
            return Err(SandboxError::OutsideWorkspace(path.to_string()));
        }

        Ok(normalized)
    }

    /// Resolve every path or none
    pub fn resolve_all<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<PathBuf>, SandboxError> {
        paths.into_iter().map(|p| self.resolve(p)).collect()
    }

    /// Root-relative display form of an absolute path
    pub fn relative<'a>(&self, path: &'a Path) -> std::borrow::Cow<'a, str> {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the rest
fn canonicalize_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(real) => {
                let mut out = real;
                for part in rest.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name() else {
                    return Err(e);
                };
                rest.push(name.to_os_string());
                existing = match existing.parent() {
                    Some(parent) => parent,
                    None => return Err(e),
                };
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws")).unwrap();
        (dir, ws)
    }

    #[test]
    fn test_relative_path_inside() {
        let (_dir, ws) = workspace();
        let p = ws.resolve("sub/ok.txt").unwrap();
        assert_eq!(p, ws.root().join("sub").join("ok.txt"));
    }

    #[test]
    fn test_parent_escape_rejected() {
        let (_dir, ws) = workspace();
        let err = ws.resolve("../outside.txt").unwrap_err();
        assert!(matches!(err, SandboxError::OutsideWorkspace(_)));
        assert_eq!(err.to_string(), "Access denied: ../outside.txt is outside workspace");
    }

    #[test]
    fn test_inner_parent_allowed() {
        let (_dir, ws) = workspace();
        let p = ws.resolve("a/../b.txt").unwrap();
        assert_eq!(p, ws.root().join("b.txt"));
    }

    #[test]
    fn test_sneaky_parent_rejected() {
        let (_dir, ws) = workspace();
        assert!(ws.resolve("a/../../ws-sibling/x").is_err());
    }

    #[test]
    fn test_absolute_outside_rejected() {
        let (_dir, ws) = workspace();
        assert!(ws.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn test_absolute_inside_allowed() {
        let (_dir, ws) = workspace();
        let inside = ws.root().join("slides/slide_1.html");
        let p = ws.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(p, inside);
    }

    #[test]
    fn test_root_itself() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.resolve(".").unwrap(), ws.root());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        let err = ws.resolve("link/secret.txt").unwrap_err();
        assert!(matches!(err, SandboxError::OutsideWorkspace(_)));
    }

    #[test]
    fn test_resolve_all_is_all_or_nothing() {
        let (_dir, ws) = workspace();
        assert!(ws.resolve_all(["a.txt", "../b.txt"]).is_err());
        assert_eq!(ws.resolve_all(["a.txt", "b.txt"]).unwrap().len(), 2);
    }

    #[test]
    fn test_relative_display() {
        let (_dir, ws) = workspace();
        let p = ws.root().join("slides").join("x.html");
        assert_eq!(ws.relative(&p), Path::new("slides").join("x.html").to_string_lossy());
    }
}

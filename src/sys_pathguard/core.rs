//! Confinement of untrusted request paths to the served root.
//!
//! Nothing outside this module can build a [`ResolvedPath`], so every
//! filesystem call that takes one is known to stay under the [`Root`].

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("path traversal not allowed")]
    PathTraversal,

    #[error("path outside of allowed directory")]
    OutsideRoot,

    #[error("cannot resolve requested path: {0}")]
    ResolutionFailure(#[source] io::Error),
}

/// Canonical, absolute directory that all requests are confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root(PathBuf);

impl Root {
    /// Canonicalize `dir` and check that it is a directory.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let canonical = std::fs::canonicalize(dir.as_ref())?;
        if !std::fs::metadata(&canonical)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("'{}' is not a directory", canonical.display()),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// A path that is the root or a descendant of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_root(&self, root: &Root) -> bool {
        self.0 == root.0
    }

    /// Render relative to `root` as `/a/b`, using forward slashes on every
    /// host. The root itself renders as `/`.
    pub fn display_relative(&self, root: &Root) -> String {
        let rel = self.0.strip_prefix(&root.0).unwrap_or(Path::new(""));
        let mut out = String::new();
        for part in rel.components() {
            out.push('/');
            out.push_str(&part.as_os_str().to_string_lossy());
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Child entry of a resolved directory. `name` comes from a directory
    /// listing, never from the client.
    pub(crate) fn child_display(&self, root: &Root, name: &str) -> String {
        let parent = self.display_relative(root);
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

/// Map `request_path` onto `root`, or reject it.
///
/// Any `..` segment is refused outright, with either `/` or `\` as the
/// separator. The joined candidate is then canonicalized (for a path that
/// does not exist yet, its deepest existing ancestor is) and must still be
/// `root` or lie beneath it, so symlinks cannot lead out either. A dangling
/// symlink is refused as `OutsideRoot`: its target cannot be checked.
pub fn resolve(root: &Root, request_path: &str) -> Result<ResolvedPath, ResolveError> {
    let relative = normalize(request_path)?;
    let candidate = root.0.join(relative);
    let canonical = canonicalize_partial(&candidate)?;

    // Path::starts_with compares whole components, so `/data-other` is not
    // under `/data`.
    if canonical == root.0 || canonical.starts_with(&root.0) {
        Ok(ResolvedPath(canonical))
    } else {
        Err(ResolveError::OutsideRoot)
    }
}

/// Lexical clean-up: drop empty and `.` segments, refuse `..` and anything
/// that is not a plain file name on this host (drive prefixes, roots).
fn normalize(request_path: &str) -> Result<PathBuf, ResolveError> {
    let mut out = PathBuf::new();
    for segment in request_path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(ResolveError::PathTraversal),
            _ => {}
        }
        if segment.contains('\0') {
            return Err(ResolveError::PathTraversal);
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => out.push(name),
            _ => return Err(ResolveError::PathTraversal),
        }
    }
    Ok(out)
}

/// Canonicalize the deepest existing ancestor of `path` and re-attach the
/// missing tail. The tail holds only normal components at this point, and
/// none of them may be a dangling symlink, since creating a file through one
/// writes wherever it points.
fn canonicalize_partial(path: &Path) -> Result<PathBuf, ResolveError> {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut canonical) => {
                for part in tail.iter().rev() {
                    canonical.push(part);
                }
                return Ok(canonical);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                if std::fs::symlink_metadata(existing).is_ok_and(|m| m.file_type().is_symlink()) {
                    return Err(ResolveError::OutsideRoot);
                }
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        tail.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(ResolveError::ResolutionFailure(e)),
                }
            }
            Err(e) => return Err(ResolveError::ResolutionFailure(e)),
        }
    }
}

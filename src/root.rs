//! Serving root and filename validation.
//!
//! The namespace is flat: a requestable name is a single path component.
//! Names containing `..` or any separator are rejected syntactically,
//! before the filesystem is touched. The lexical prefix check after the
//! join only matters if that rule is ever relaxed.

use crate::error::SessionError;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tracing::{debug, warn};

/// A validated path inside the serving root. Not yet opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: PathBuf,
}

/// An opened, regular file and the size announced to the client.
#[derive(Debug)]
pub struct OpenedFile {
    pub file: File,
    pub size: u64,
    pub path: PathBuf,
}

/// The directory all requests resolve under.
///
/// Built once at startup and shared read-only between sessions.
#[derive(Debug, Clone)]
pub struct ServingRoot {
    root: PathBuf,
}

impl ServingRoot {
    /// Canonicalize `dir` and confirm it is a directory.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(dir.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a directory", root.display()),
            ));
        }

        Ok(Self { root })
    }

    /// Canonical root path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied name to a path strictly under the root.
    pub fn resolve(&self, filename: &str) -> Result<ResolvedPath, SessionError> {
        if filename.is_empty() || filename.contains("..") || filename.chars().any(is_forbidden) {
            return Err(SessionError::InvalidFilename);
        }

        let joined = normalize(&self.root.join(filename));
        if !self.contains(&joined) {
            return Err(SessionError::AccessDenied);
        }

        Ok(ResolvedPath { path: joined })
    }

    /// Open and stat a resolved path.
    ///
    /// The file is opened first. Its canonical path must lie under the root
    /// and name the same file that was opened, so a symlink pointing out of
    /// the root, or one swapped in between the two steps, is denied.
    pub async fn open(&self, resolved: &ResolvedPath) -> Result<OpenedFile, SessionError> {
        let file = File::open(&resolved.path)
            .await
            .map_err(SessionError::NotFound)?;
        let metadata = file.metadata().await.map_err(SessionError::StatFailure)?;

        let real = tokio::fs::canonicalize(&resolved.path)
            .await
            .map_err(SessionError::NotFound)?;
        if !self.contains(&real) {
            warn!(path = %resolved.path.display(), "Symlink escapes serving root");
            return Err(SessionError::AccessDenied);
        }

        let target = tokio::fs::metadata(&real)
            .await
            .map_err(SessionError::StatFailure)?;
        if !same_file(&metadata, &target) {
            warn!(path = %resolved.path.display(), "File changed while opening");
            return Err(SessionError::AccessDenied);
        }

        if !metadata.is_file() {
            debug!(path = %resolved.path.display(), "Not a regular file");
            return Err(SessionError::NotFound(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        Ok(OpenedFile {
            file,
            size: metadata.len(),
            path: resolved.path.clone(),
        })
    }

    /// Strictly below the root; the root itself does not count.
    fn contains(&self, path: &Path) -> bool {
        path != self.root && path.starts_with(&self.root)
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len() && a.file_type() == b.file_type()
}

/// Separators on any platform, plus NUL.
fn is_forbidden(c: char) -> bool {
    c == '/' || c == '\\' || c == '\0' || std::path::is_separator(c)
}

/// Lexically fold `.` and `..` components.
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root_with(files: &[(&str, &[u8])]) -> (TempDir, ServingRoot) {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let root = ServingRoot::new(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolve_plain_name() {
        let (_dir, root) = root_with(&[("a.txt", b"hello")]);
        let resolved = root.resolve("a.txt").unwrap();
        assert_eq!(resolved.path, root.path().join("a.txt"));
        assert!(resolved.path.starts_with(root.path()));
    }

    #[test]
    fn test_resolve_rejects_traversal_and_separators() {
        let (_dir, root) = root_with(&[]);
        let names = [
            "", "..", "../secret", "a..b", "sub/a.txt", "/etc/passwd", "sub\\a.txt", "a\0b",
        ];
        for name in names {
            assert!(
                matches!(root.resolve(name), Err(SessionError::InvalidFilename)),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_resolve_rejects_root_itself() {
        let (_dir, root) = root_with(&[]);
        assert!(matches!(root.resolve("."), Err(SessionError::AccessDenied)));
    }

    #[test]
    fn test_resolve_does_not_touch_filesystem() {
        let (_dir, root) = root_with(&[]);
        // Missing files still resolve; existence is checked at open time.
        assert!(root.resolve("missing.txt").is_ok());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/srv/files/./a")), PathBuf::from("/srv/files/a"));
        assert_eq!(normalize(Path::new("/srv/files/../x")), PathBuf::from("/srv/x"));
    }

    #[test]
    fn test_new_rejects_file_root() {
        let (dir, _root) = root_with(&[("a.txt", b"hello")]);
        let err = ServingRoot::new(dir.path().join("a.txt")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(ServingRoot::new(dir.path().join("nope")).is_err());
    }

    #[tokio::test]
    async fn test_open_reports_size() {
        let (_dir, root) = root_with(&[("a.txt", b"hello")]);
        let opened = root.open(&root.resolve("a.txt").unwrap()).await.unwrap();
        assert_eq!(opened.size, 5);
    }

    #[tokio::test]
    async fn test_open_missing() {
        let (_dir, root) = root_with(&[]);
        let result = root.open(&root.resolve("missing.txt").unwrap()).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_directory_is_not_found() {
        let (dir, root) = root_with(&[]);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let result = root.open(&root.resolve("sub").unwrap()).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_denied() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"top secret").unwrap();

        let (dir, root) = root_with(&[("inside.txt", b"ok")]);
        symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();
        symlink(dir.path().join("inside.txt"), dir.path().join("alias")).unwrap();
        symlink(outside.path(), dir.path().join("outdir")).unwrap();

        let escaped = root.open(&root.resolve("link").unwrap()).await;
        assert!(matches!(escaped, Err(SessionError::AccessDenied)));

        let escaped_dir = root.open(&root.resolve("outdir").unwrap()).await;
        assert!(matches!(escaped_dir, Err(SessionError::AccessDenied)));

        let internal = root.open(&root.resolve("alias").unwrap()).await.unwrap();
        assert_eq!(internal.size, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_same_file_compares_identity() {
        let (dir, _root) = root_with(&[("a.txt", b"same"), ("b.txt", b"same")]);
        let a = std::fs::metadata(dir.path().join("a.txt")).unwrap();
        let a_again = std::fs::metadata(dir.path().join("a.txt")).unwrap();
        let b = std::fs::metadata(dir.path().join("b.txt")).unwrap();

        assert!(same_file(&a, &a_again));
        assert!(!same_file(&a, &b));
    }
}

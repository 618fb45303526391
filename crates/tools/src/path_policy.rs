//! Path policy: canonicalization and mutable-root containment.
//!
//! Every built-in that opens a caller-supplied path runs it through
//! [`resolve_in_roots`]. Failure messages always name the requested path.

use std::path::{Component, Path, PathBuf};

use drost_domain::{Error, Result};

/// Canonicalize a path, tolerating a not-yet-existing tail: the nearest
/// existing ancestor is resolved and the remaining components reappended.
pub fn canonicalize(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path.canonicalize().map_err(Error::Io);
    }

    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.parent() {
            Some(parent) => {
                if let Some(name) = existing.file_name() {
                    tail.push(name);
                }
                existing = parent;
            }
            None => break,
        }
    }

    let mut resolved = existing.canonicalize().map_err(Error::Io)?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

/// True iff `path` is inside `root`: the relative form neither starts with
/// `..` nor is absolute. Both sides are canonicalized first.
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let (Ok(path), Ok(root)) = (canonicalize(path), canonicalize(root)) else {
        return false;
    };
    path.strip_prefix(&root).is_ok()
}

/// Assert that `path` lives inside at least one mutable root.
pub fn assert_in_mutable_roots(requested: &str, path: &Path, roots: &[PathBuf]) -> Result<()> {
    if roots.iter().any(|root| is_within_root(path, root)) {
        Ok(())
    } else {
        Err(Error::PathOutsideRoots {
            path: requested.to_owned(),
        })
    }
}

/// Resolve a caller-supplied path against `base` and assert containment.
///
/// Absolute paths and raw `..` components are rejected before any
/// filesystem resolution.
pub fn resolve_in_roots(requested: &str, base: &Path, roots: &[PathBuf]) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(Error::PathOutsideRoots {
            path: requested.to_owned(),
        });
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(Error::PathOutsideRoots {
                path: requested.to_owned(),
            });
        }
    }

    let resolved = canonicalize(&base.join(requested_path))?;
    assert_in_mutable_roots(requested, &resolved, roots)?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn canonicalize_missing_leaf() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("new/sub/file.txt");
        let resolved = canonicalize(&target).unwrap();
        assert!(resolved.ends_with("new/sub/file.txt"));
    }

    #[test]
    fn within_root_checks() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        assert!(is_within_root(&dir.path().join("inner"), dir.path()));
        assert!(!is_within_root(dir.path(), &dir.path().join("inner")));
    }

    #[test]
    fn resolve_rejects_absolute() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let err = resolve_in_roots("/etc/passwd", dir.path(), &roots).unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoots { ref path } if path == "/etc/passwd"));
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let err = resolve_in_roots("../escape.txt", dir.path(), &roots).unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoots { .. }));
    }

    #[test]
    fn resolve_accepts_nested_new_file() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let resolved = resolve_in_roots("sub/dir/new.txt", dir.path(), &roots).unwrap();
        assert!(resolved.ends_with("sub/dir/new.txt"));
    }

    #[test]
    fn base_outside_roots_is_denied() {
        let workspace = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let roots = vec![elsewhere.path().to_path_buf()];
        let err = resolve_in_roots("file.txt", workspace.path(), &roots).unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoots { ref path } if path == "file.txt"));
    }

    #[test]
    fn error_names_requested_path() {
        let dir = TempDir::new().unwrap();
        let err = assert_in_mutable_roots("secret/../../x", dir.path().join("x").as_path(), &[])
            .unwrap_err();
        assert!(err.to_string().contains("secret/../../x"));
    }
}

//! Path containment for tool filesystem access.

use std::path::{Component, Path, PathBuf};

use crate::error::Error;
use crate::Result;

/// Resolve `requested` relative to `root` and make sure it stays inside.
///
/// `..` segments and symlinks in the existing part of the path are resolved
/// before the check. Containment is decided per path component, so a
/// sibling sharing a name prefix (`/media/a-b` vs `/media/a`) is rejected.
pub fn ensure_contained(root: &Path, requested: impl AsRef<Path>) -> Result<PathBuf> {
    let requested = requested.as_ref();
    let root = root.canonicalize()?;

    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let resolved = resolve_lenient(&joined)?;

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(Error::Containment {
            path: requested.to_path_buf(),
        })
    }
}

/// Canonicalize the longest existing ancestor and append the rest, so paths
/// that do not exist yet (output files) can still be checked.
fn resolve_lenient(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    let mut existing = normalized.clone();
    let mut missing = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                missing.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for part in missing.iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_paths_resolve_inside() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let root = tmp.path().canonicalize().unwrap();

        assert_eq!(ensure_contained(tmp.path(), "sub").unwrap(), root.join("sub"));
        assert_eq!(
            ensure_contained(tmp.path(), "sub/../new.txt").unwrap(),
            root.join("new.txt")
        );
        assert_eq!(ensure_contained(tmp.path(), ".").unwrap(), root);
    }

    #[test]
    fn test_escapes_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let session = tmp.path().join("session");
        std::fs::create_dir(&session).unwrap();
        std::fs::create_dir(tmp.path().join("session-other")).unwrap();

        for bad in ["..", "../session-other/x", "/etc/passwd"] {
            let err = ensure_contained(&session, bad).unwrap_err();
            assert!(matches!(err, Error::Containment { .. }), "{bad} was accepted");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let session = tmp.path().join("session");
        let outside = tmp.path().join("outside");
        std::fs::create_dir(&session).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, session.join("link")).unwrap();

        assert!(ensure_contained(&session, "link/secret.txt").is_err());
    }
}

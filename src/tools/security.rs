//! Path jail for task workspaces
//!
//! Every path a tool touches is resolved against its task root:
//! - Lexical normalisation first (`.` dropped, `..` folded, escapes rejected)
//! - Then the nearest existing ancestor is canonicalised so symlinks cannot
//!   lead outside the root
//!
//! The lexical form doubles as the lock-table key, so `a.txt`, `./a.txt` and
//! `sub/../a.txt` all name the same lock.

use crate::errors::{EngineError, Result};
use std::path::{Component, Path, PathBuf};

/// Path jail security manager
#[derive(Debug, Clone)]
pub struct PathJail {
    /// Canonicalized jail root directory
    jail_root: PathBuf,
}

impl PathJail {
    /// Create new path jail with given root directory
    pub fn new(jail_root: impl AsRef<Path>) -> Result<Self> {
        let jail_root = jail_root.as_ref();

        if !jail_root.exists() {
            return Err(EngineError::ConfigError(format!(
                "Jail root does not exist: {}",
                jail_root.display()
            )));
        }

        let jail_root = jail_root.canonicalize().map_err(|e| {
            EngineError::ConfigError(format!("Failed to canonicalize jail root: {}", e))
        })?;

        Ok(Self { jail_root })
    }

    /// Lexically normalised path relative to the jail root.
    ///
    /// Absolute paths are accepted only when they already point inside the
    /// root. An empty result means the root itself.
    pub fn relative(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            let stripped = candidate.strip_prefix(&self.jail_root).map_err(|_| {
                EngineError::Validation(format!("Path escapes task workspace: {}", path))
            })?;
            return normalize_relative(&stripped.to_string_lossy());
        }
        normalize_relative(path)
    }

    /// Resolve a user-supplied path to an absolute path inside the jail
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = self.relative(path)?;
        self.verify_and_canonicalize(self.jail_root.join(relative))
    }

    /// Verify path is within jail and return canonical path.
    ///
    /// Paths that do not exist yet (targets of writes) are checked through
    /// their nearest existing ancestor; the missing tail is re-attached to
    /// the canonical ancestor.
    pub fn verify_and_canonicalize(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();

        let full_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.jail_root.join(path)
        };

        let mut existing = full_path.as_path();
        let mut missing = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => {
                    return Err(EngineError::Validation(format!(
                        "Path verification failed: {}",
                        path.display()
                    )))
                }
            }
        }

        let mut canonical = existing.canonicalize().map_err(|e| {
            EngineError::Validation(format!("Cannot verify path {}: {}", path.display(), e))
        })?;

        if !canonical.starts_with(&self.jail_root) {
            return Err(EngineError::Validation(format!(
                "Security violation: Path escapes jail: {}",
                path.display()
            )));
        }

        for name in missing.into_iter().rev() {
            if name == ".." {
                return Err(EngineError::Validation(format!(
                    "Path escapes jail: {}",
                    path.display()
                )));
            }
            canonical.push(name);
        }

        Ok(canonical)
    }

    /// Get jail root directory
    pub fn jail_root(&self) -> &Path {
        &self.jail_root
    }
}

/// Fold `.` and `..` in a relative path without touching the filesystem
pub fn normalize_relative(path: &str) -> Result<PathBuf> {
    let mut parts = Vec::new();

    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(EngineError::Validation(format!(
                        "Path escapes task workspace: {}",
                        path
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::Validation(format!(
                    "Absolute path not allowed here: {}",
                    path
                )));
            }
        }
    }

    Ok(parts.iter().collect())
}

/// Render a relative path with forward slashes, the form used in lock keys
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup_test_jail() -> (PathJail, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let jail = PathJail::new(temp_dir.path()).unwrap();
        (jail, temp_dir)
    }

    #[test]
    fn test_jail_creation_nonexistent() {
        let jail = PathJail::new("/nonexistent/path/12345");
        assert!(jail.is_err());
    }

    #[test]
    fn test_relative_normalizes_equivalent_spellings() {
        let (jail, _temp) = setup_test_jail();

        let expected = PathBuf::from("a.txt");
        assert_eq!(jail.relative("a.txt").unwrap(), expected);
        assert_eq!(jail.relative("./a.txt").unwrap(), expected);
        assert_eq!(jail.relative("sub/../a.txt").unwrap(), expected);

        let absolute = jail.jail_root().join("a.txt");
        assert_eq!(jail.relative(&absolute.to_string_lossy()).unwrap(), expected);
    }

    #[test]
    fn test_resolve_nonexistent_nested_target() {
        let (jail, _temp) = setup_test_jail();

        let resolved = jail.resolve("reports/2024/out.txt").unwrap();
        assert!(resolved.starts_with(jail.jail_root()));
        assert!(resolved.ends_with("reports/2024/out.txt"));
    }

    #[test]
    fn test_resolve_existing_file() {
        let (jail, temp_dir) = setup_test_jail();
        fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        fs::write(temp_dir.path().join("a/b/file.txt"), "test").unwrap();

        let resolved = jail.resolve("a/b/file.txt").unwrap();
        assert!(resolved.is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_reject_symlink_escape() {
        let (jail, temp_dir) = setup_test_jail();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        assert!(jail.resolve("link/secret.txt").is_err());
    }

    #[test]
    fn test_security_multiple_escape_attempts() {
        let (jail, _temp_dir) = setup_test_jail();

        let escape_attempts = vec![
            "../../../etc/passwd",
            "../../..",
            "./../../../",
            "/etc/passwd",
            "/tmp/../etc/passwd",
            "subdir/../../..",
        ];

        for attempt in escape_attempts {
            let result = jail.resolve(attempt);
            assert!(result.is_err(), "Escape attempt should fail: {}", attempt);
        }
    }

    #[test]
    fn test_slash_path() {
        let rel = normalize_relative("a/./b/../c.txt").unwrap();
        assert_eq!(slash_path(&rel), "a/c.txt");
        assert_eq!(slash_path(Path::new("")), "");
    }
}

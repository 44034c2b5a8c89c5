//! File-lock arbitration
//!
//! - Lock records and requester identity
//! - Write-replace persistence of the table
//! - The mutex-guarded table itself
//!
//! Keys are paths relative to the workspace root, e.g. `tasks/demo/a.txt`.
//! Symlinks are resolved before a key is built, so every alias of a file
//! inside the task maps to the same key.

pub mod types;
pub mod store;
pub mod table;

pub use types::{LockEntry, LockRecord, Requester};
pub use store::LockStore;
pub use table::LockTable;

use crate::errors::{EngineError, Result};
use crate::tools::security::{slash_path, PathJail};

/// Lock scope covering a whole task workspace
pub fn task_scope(task_id: &str) -> String {
    format!("tasks/{}", task_id)
}

/// Lock key for `file_path` inside the task jailed by `jail`.
///
/// The existing prefix of the path is canonicalized; a missing tail (the
/// target of a write) is kept as given after normalization.
pub fn task_lock_key(jail: &PathJail, task_id: &str, file_path: &str) -> Result<String> {
    let resolved = jail.resolve(file_path)?;
    let relative = resolved.strip_prefix(jail.jail_root()).map_err(|_| {
        EngineError::Validation(format!("Path escapes task workspace: {}", file_path))
    })?;
    let relative = slash_path(relative);
    if relative.is_empty() {
        Ok(task_scope(task_id))
    } else {
        Ok(format!("{}/{}", task_scope(task_id), relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lock_key_normalizes() {
        let temp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(temp.path()).unwrap();

        assert_eq!(task_lock_key(&jail, "demo", "a.txt").unwrap(), "tasks/demo/a.txt");
        assert_eq!(
            task_lock_key(&jail, "demo", "./out/../a.txt").unwrap(),
            "tasks/demo/a.txt"
        );
        assert_eq!(task_lock_key(&jail, "demo", ".").unwrap(), "tasks/demo");
        assert!(task_lock_key(&jail, "demo", "../other/a.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_task_lock_key_follows_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("a.txt", temp.path().join("alias.txt")).unwrap();
        std::os::unix::fs::symlink("sub", temp.path().join("linkdir")).unwrap();

        assert_eq!(task_lock_key(&jail, "demo", "alias.txt").unwrap(), "tasks/demo/a.txt");
        // a new file under a linked directory keys on the real directory
        assert_eq!(
            task_lock_key(&jail, "demo", "linkdir/new.txt").unwrap(),
            "tasks/demo/sub/new.txt"
        );

        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();
        assert!(task_lock_key(&jail, "demo", "escape/x.txt").is_err());
    }
}

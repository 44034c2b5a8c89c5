//! On-disk form of the lock table
//!
//! A flat JSON object `path -> {level, locker_name, created_at, note}`.
//! Saves go to a sibling temp file which is synced and renamed over the
//! original, so a reader sees either the old table or the new one.

use crate::errors::Result;
use crate::locks::types::LockRecord;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persisted lock map
pub type LockMap = BTreeMap<String, LockRecord>;

#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table; a missing file is an empty table
    pub fn load(&self) -> Result<LockMap> {
        if !self.path.exists() {
            return Ok(LockMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(LockMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Replace the file contents with `locks`
    pub fn save(&self, locks: &LockMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "locks.json".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let contents = serde_json::to_vec_pretty(locks)?;
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&contents)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        Ok(written?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_missing_file_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = LockStore::new(temp.path().join("locks.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let temp = tempfile::tempdir().unwrap();
        let store = LockStore::new(temp.path().join("locks.json"));

        let mut locks = LockMap::new();
        locks.insert(
            "tasks/demo/a.txt".to_string(),
            LockRecord {
                level: 2,
                locker_name: "alice".to_string(),
                created_at: Utc::now(),
                note: Some("drafting".to_string()),
            },
        );
        store.save(&locks).unwrap();
        store.save(&locks).unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["locks.json".to_string()]);
        assert_eq!(store.load().unwrap(), locks);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("locks.json");
        fs::write(&path, "{not json").unwrap();

        assert!(LockStore::new(path).load().is_err());
    }
}

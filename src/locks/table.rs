//! Lock table
//!
//! Arbitrates concurrent mutation of individual files inside task
//! workspaces. All reads-then-writes happen inside one mutex together with
//! the persist step, so two callers can never both pass the check for the
//! same path.
//!
//! Granularity is a single normalized path. Locking a directory key does
//! not protect the files below it.

use crate::errors::{EngineError, Result};
use crate::locks::store::{LockMap, LockStore};
use crate::locks::types::{LockEntry, LockRecord, Requester};
use chrono::Utc;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// File name of the persisted table under the workspace root
pub const LOCK_FILE_NAME: &str = "locks.json";

/// Persisted, mutex-guarded lock table
#[derive(Debug)]
pub struct LockTable {
    store: LockStore,
    locks: Mutex<LockMap>,
}

impl LockTable {
    /// Load the table stored under `workspace_root`
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let store = LockStore::new(workspace_root.as_ref().join(LOCK_FILE_NAME));
        let locks = store.load()?;
        info!(count = locks.len(), path = %store.path().display(), "lock table loaded");
        Ok(Self {
            store,
            locks: Mutex::new(locks),
        })
    }

    fn guard(&self) -> Result<MutexGuard<'_, LockMap>> {
        self.locks
            .lock()
            .map_err(|_| EngineError::Generic("lock table mutex poisoned".to_string()))
    }

    /// Apply `change` to a copy of the table, persist it, then publish it
    fn mutate<T>(&self, change: impl FnOnce(&mut LockMap) -> Result<T>) -> Result<T> {
        let mut locks = self.guard()?;
        let mut next = locks.clone();
        let outcome = change(&mut next)?;
        self.store.save(&next)?;
        *locks = next;
        Ok(outcome)
    }

    /// Decide whether `requester` may mutate `path`
    pub fn check_access(&self, path: &str, requester: &Requester) -> Result<()> {
        let locks = self.guard()?;
        match locks.get(path) {
            Some(lock) if !lock.admits(requester) => Err(denied(path, lock)),
            _ => Ok(()),
        }
    }

    /// Take or override the lock on `path`
    pub fn lock(
        &self,
        path: &str,
        level: u32,
        locker_name: &str,
        note: Option<String>,
    ) -> Result<LockEntry> {
        if level < 1 {
            return Err(EngineError::Validation(
                "Lock level must be a positive integer".to_string(),
            ));
        }
        if locker_name.trim().is_empty() {
            return Err(EngineError::Validation("locker_name is required".to_string()));
        }

        let requester = Requester::new(locker_name, level);
        let entry = self.mutate(|locks| {
            if let Some(current) = locks.get(path) {
                if !current.admits(&requester) {
                    return Err(denied(path, current));
                }
            }
            let record = LockRecord {
                level,
                locker_name: locker_name.to_string(),
                created_at: Utc::now(),
                note,
            };
            locks.insert(path.to_string(), record.clone());
            Ok(LockEntry {
                path: path.to_string(),
                record,
            })
        })?;

        info!(path, level, locker_name, "lock acquired");
        Ok(entry)
    }

    /// Release the lock on `path`, returning what was removed
    pub fn unlock(&self, path: &str, requester: &Requester) -> Result<LockEntry> {
        let entry = self.mutate(|locks| {
            let current = locks
                .get(path)
                .ok_or_else(|| EngineError::NotFound(format!("File is not locked: {}", path)))?;
            if !current.admits(requester) {
                return Err(denied(path, current));
            }
            let record = locks.remove(path).ok_or_else(|| {
                EngineError::NotFound(format!("File is not locked: {}", path))
            })?;
            Ok(LockEntry {
                path: path.to_string(),
                record,
            })
        })?;

        info!(path, unlocker = %requester.name, level = requester.level, "lock released");
        Ok(entry)
    }

    /// The lock guarding `path`, if any
    pub fn get(&self, path: &str) -> Result<Option<LockEntry>> {
        let locks = self.guard()?;
        Ok(locks.get(path).map(|record| LockEntry {
            path: path.to_string(),
            record: record.clone(),
        }))
    }

    /// All active locks, ordered by path
    pub fn list(&self) -> Result<Vec<LockEntry>> {
        let locks = self.guard()?;
        Ok(locks
            .iter()
            .map(|(path, record)| LockEntry {
                path: path.clone(),
                record: record.clone(),
            })
            .collect())
    }

    /// Active locks at or below `scope`
    pub fn list_under(&self, scope: &str) -> Result<Vec<LockEntry>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| in_scope(&entry.path, scope))
            .collect())
    }

    /// Drop every lock at or below `scope`; returns how many were removed
    pub fn release_under(&self, scope: &str) -> Result<usize> {
        let removed = self.mutate(|locks| {
            let before = locks.len();
            locks.retain(|path, _| !in_scope(path, scope));
            Ok(before - locks.len())
        })?;
        if removed > 0 {
            debug!(scope, removed, "released scoped locks");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.guard().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn in_scope(path: &str, scope: &str) -> bool {
    let scope = scope.trim_end_matches('/');
    path == scope || path.starts_with(&format!("{}/", scope))
}

fn denied(path: &str, lock: &LockRecord) -> EngineError {
    EngineError::AccessDenied {
        path: path.to_string(),
        locker_name: lock.locker_name.clone(),
        level: lock.level,
    }
}

//! Lock records and requester identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted lock, keyed externally by its normalized path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Override authority; higher levels beat lower ones
    pub level: u32,

    /// Identity of the holder
    pub locker_name: String,

    /// When the lock was taken (or last overridden)
    pub created_at: DateTime<Utc>,

    /// Free-form annotation
    #[serde(default)]
    pub note: Option<String>,
}

impl LockRecord {
    /// Whether `requester` may act on a path guarded by this lock
    pub fn admits(&self, requester: &Requester) -> bool {
        requester.level >= self.level || requester.name == self.locker_name
    }
}

/// A lock together with the path it guards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub path: String,

    #[serde(flatten)]
    pub record: LockRecord,
}

/// Identity presented by a caller when touching locked paths.
///
/// Calls without identity are anonymous at level 0: they pass only where
/// no lock exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub name: String,
    pub level: u32,
}

impl Requester {
    pub fn new(name: impl Into<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }

    /// Read `locker_name` and `level` from dispatch parameters
    pub fn from_params(params: &serde_json::Value) -> Self {
        let name = params["locker_name"].as_str().unwrap_or("").to_string();
        let level = params["level"]
            .as_u64()
            .map(|l| l.min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        Self { name, level }
    }
}

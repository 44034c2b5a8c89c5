//! Task metadata and status summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Sub-directories created inside every task workspace
pub const TASK_AREAS: [&str; 5] = ["config", "upload", "code_env", "code_run", "logs"];

/// Persisted task metadata (`config/meta.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub task_name: String,
    pub created_at: DateTime<Utc>,

    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default)]
    pub requirements: Option<String>,
}

fn default_status() -> String {
    "active".to_string()
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, task_name: impl Into<String>, requirements: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            created_at: Utc::now(),
            status: default_status(),
            requirements,
        }
    }
}

/// Returned by task creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
    pub task_name: String,
    pub path: PathBuf,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Returned by task deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDeleted {
    pub task_id: String,
    pub status: String,
    pub released_locks: usize,
}

/// Usage of one workspace area
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaUsage {
    pub files: u64,
    pub bytes: u64,
}

/// File counts and sizes under a task workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub task_name: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub path: PathBuf,
    pub file_count: u64,
    pub dir_count: u64,
    pub total_bytes: u64,
    pub areas: BTreeMap<String, AreaUsage>,
}

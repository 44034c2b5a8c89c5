//! Task registry
//!
//! Owns the `tasks/` directory under the workspace root. Each task gets an
//! isolated tree:
//!
//! ```text
//! <root>/tasks/<task_id>/
//!     config/meta.json
//!     upload/  code_env/  code_run/  logs/
//! ```
//!
//! All operations are synchronous filesystem work. Async callers should run
//! the recursive ones (delete, status, copy) on the blocking pool.

use crate::errors::{EngineError, Result};
use crate::locks::{task_scope, LockTable};
use crate::tools::security::PathJail;
use crate::task::types::{AreaUsage, TaskCreated, TaskDeleted, TaskInfo, TaskStatus, TASK_AREAS};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

const META_FILE: &str = "meta.json";
const MAX_TASK_ID_LEN: usize = 128;

/// Registry of task workspaces
#[derive(Debug)]
pub struct TaskRegistry {
    /// Workspace root (parent of `tasks/` and `locks.json`)
    root: PathBuf,

    /// Known tasks keyed by id
    tasks: RwLock<HashMap<String, TaskInfo>>,

    /// Locks scoped under a task are released with it
    locks: Arc<LockTable>,
}

impl TaskRegistry {
    /// Open the registry and load every task found on disk
    pub fn open(root: impl AsRef<Path>, locks: Arc<LockTable>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let tasks_dir = root.join("tasks");
        fs::create_dir_all(&tasks_dir)?;

        let mut tasks = HashMap::new();
        for entry in fs::read_dir(&tasks_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let meta_path = entry.path().join("config").join(META_FILE);
            match read_meta(&meta_path) {
                Ok(info) => {
                    tasks.insert(info.task_id.clone(), info);
                }
                Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping task without readable metadata"),
            }
        }

        info!(count = tasks.len(), root = %root.display(), "task registry loaded");
        Ok(Self {
            root,
            tasks: RwLock::new(tasks),
            locks,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, TaskInfo>>> {
        self.tasks
            .read()
            .map_err(|_| EngineError::Generic("task registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, TaskInfo>>> {
        self.tasks
            .write()
            .map_err(|_| EngineError::Generic("task registry lock poisoned".to_string()))
    }

    /// Workspace root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root of one task's workspace (whether or not it exists)
    pub fn workspace_path(&self, task_id: &str) -> PathBuf {
        self.root.join("tasks").join(task_id)
    }

    /// Create a task and its workspace tree
    pub fn create(
        &self,
        task_id: &str,
        task_name: &str,
        requirements: Option<String>,
    ) -> Result<TaskCreated> {
        validate_task_id(task_id)?;
        let mut tasks = self.write()?;

        let path = self.workspace_path(task_id);
        if tasks.contains_key(task_id) || path.exists() {
            return Err(EngineError::Conflict(format!("Task {} already exists", task_id)));
        }

        let task_name = if task_name.trim().is_empty() { task_id } else { task_name };
        let info = TaskInfo::new(task_id, task_name, requirements);

        if let Err(e) = build_workspace(&path, &info) {
            let _ = fs::remove_dir_all(&path);
            return Err(e);
        }

        info!(task_id, path = %path.display(), "task created");
        tasks.insert(task_id.to_string(), info.clone());

        Ok(TaskCreated {
            task_id: info.task_id,
            task_name: info.task_name,
            path,
            status: "created".to_string(),
            created_at: info.created_at,
        })
    }

    /// Remove a task's workspace and every lock scoped under it
    pub fn delete(&self, task_id: &str) -> Result<TaskDeleted> {
        validate_task_id(task_id)?;
        let mut tasks = self.write()?;

        let path = self.workspace_path(task_id);
        if !tasks.contains_key(task_id) && !path.exists() {
            return Err(EngineError::NotFound(format!("Task {} not found", task_id)));
        }

        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        tasks.remove(task_id);
        let released_locks = self.locks.release_under(&task_scope(task_id))?;

        info!(task_id, released_locks, "task deleted");
        Ok(TaskDeleted {
            task_id: task_id.to_string(),
            status: "deleted".to_string(),
            released_locks,
        })
    }

    /// Look up a task, loading it from disk if another process created it
    pub fn get(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        if let Some(info) = self.read()?.get(task_id) {
            return Ok(Some(info.clone()));
        }
        if validate_task_id(task_id).is_err() {
            return Ok(None);
        }

        let meta_path = self.workspace_path(task_id).join("config").join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }
        let info = read_meta(&meta_path)?;
        self.write()?.insert(task_id.to_string(), info.clone());
        Ok(Some(info))
    }

    pub fn exists(&self, task_id: &str) -> bool {
        matches!(self.get(task_id), Ok(Some(_)))
    }

    /// Jail-checked absolute path of `relative` inside a task workspace
    pub fn resolve_path(&self, task_id: &str, relative: &str) -> Result<PathBuf> {
        if !self.exists(task_id) {
            return Err(EngineError::NotFound(format!("Task {} not found", task_id)));
        }
        PathJail::new(self.workspace_path(task_id))?.resolve(relative)
    }

    /// Tasks ordered by creation time, most recent first
    pub fn list(&self) -> Result<Vec<TaskInfo>> {
        let mut tasks: Vec<TaskInfo> = self.read()?.values().cloned().collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(tasks)
    }

    /// File counts and sizes under a task workspace
    pub fn get_status(&self, task_id: &str) -> Result<TaskStatus> {
        let info = self
            .get(task_id)?
            .ok_or_else(|| EngineError::NotFound(format!("Task {} not found", task_id)))?;
        let path = self.workspace_path(task_id);

        let mut areas: BTreeMap<String, AreaUsage> = BTreeMap::new();
        for area in TASK_AREAS {
            areas.insert(area.to_string(), AreaUsage::default());
        }

        let mut file_count = 0;
        let mut dir_count = 0;
        let mut total_bytes = 0;
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = fs::symlink_metadata(entry.path())?;
            let usage = areas.entry(name).or_default();

            if meta.is_dir() {
                dir_count += 1;
                let (files, dirs, bytes) = walk_usage(&entry.path())?;
                usage.files += files;
                usage.bytes += bytes;
                file_count += files;
                dir_count += dirs;
                total_bytes += bytes;
            } else {
                usage.files += 1;
                usage.bytes += meta.len();
                file_count += 1;
                total_bytes += meta.len();
            }
        }

        Ok(TaskStatus {
            task_id: info.task_id,
            task_name: info.task_name,
            created_at: info.created_at,
            status: info.status,
            path,
            file_count,
            dir_count,
            total_bytes,
            areas,
        })
    }

    /// Clone `source` into each of `targets`.
    ///
    /// All targets are checked before anything is written; if any copy fails,
    /// every target created by this call is removed again.
    pub fn copy(&self, source: &str, targets: &[String]) -> Result<Vec<TaskCreated>> {
        validate_task_id(source)?;
        if targets.is_empty() {
            return Err(EngineError::Validation(
                "Target id list must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for target in targets {
            validate_task_id(target)?;
            if target == source {
                return Err(EngineError::Validation(
                    "Target ids must not contain the source task".to_string(),
                ));
            }
            if !seen.insert(target.as_str()) {
                return Err(EngineError::Validation(format!(
                    "Duplicate target id: {}",
                    target
                )));
            }
        }

        let source_info = self
            .get(source)?
            .ok_or_else(|| EngineError::NotFound(format!("Source task not found: {}", source)))?;

        let mut tasks = self.write()?;
        let existing: Vec<&str> = targets
            .iter()
            .map(String::as_str)
            .filter(|t| tasks.contains_key(*t) || self.workspace_path(t).exists())
            .collect();
        if !existing.is_empty() {
            return Err(EngineError::Conflict(format!(
                "Target task(s) already exist: {}",
                existing.join(", ")
            )));
        }

        let source_path = self.workspace_path(source);
        let mut created: Vec<TaskCreated> = Vec::with_capacity(targets.len());
        for target in targets {
            let path = self.workspace_path(target);
            let info = TaskInfo::new(
                target.clone(),
                source_info.task_name.clone(),
                source_info.requirements.clone(),
            );
            let copied = copy_tree(&source_path, &path, &["logs"])
                .map_err(EngineError::from)
                .and_then(|_| write_meta(&path, &info));

            if let Err(e) = copied {
                let _ = fs::remove_dir_all(&path);
                for done in &created {
                    let _ = fs::remove_dir_all(&done.path);
                    tasks.remove(&done.task_id);
                }
                return Err(e);
            }

            tasks.insert(target.clone(), info.clone());
            created.push(TaskCreated {
                task_id: info.task_id,
                task_name: info.task_name,
                path,
                status: "created".to_string(),
                created_at: info.created_at,
            });
        }

        info!(source, count = created.len(), "task workspace copied");
        Ok(created)
    }
}

/// Task ids are used as a single directory name
pub fn validate_task_id(task_id: &str) -> Result<()> {
    let valid = !task_id.is_empty()
        && task_id.len() <= MAX_TASK_ID_LEN
        && task_id != "."
        && task_id != ".."
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("Invalid task id: {:?}", task_id)))
    }
}

fn build_workspace(path: &Path, info: &TaskInfo) -> Result<()> {
    for area in TASK_AREAS {
        fs::create_dir_all(path.join(area))?;
    }
    write_meta(path, info)
}

fn write_meta(task_path: &Path, info: &TaskInfo) -> Result<()> {
    let config_dir = task_path.join("config");
    fs::create_dir_all(&config_dir)?;
    fs::write(config_dir.join(META_FILE), serde_json::to_vec_pretty(info)?)?;
    Ok(())
}

fn read_meta(path: &Path) -> Result<TaskInfo> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// (files, dirs, bytes) below `dir`, not following symlinks
fn walk_usage(dir: &Path) -> Result<(u64, u64, u64)> {
    let mut files = 0;
    let mut dirs = 0;
    let mut bytes = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = fs::symlink_metadata(entry.path())?;
        if meta.is_dir() {
            dirs += 1;
            let (f, d, b) = walk_usage(&entry.path())?;
            files += f;
            dirs += d;
            bytes += b;
        } else {
            files += 1;
            bytes += meta.len();
        }
    }

    Ok((files, dirs, bytes))
}

/// Copy a directory tree; directories named in `empty` are recreated
/// without their contents. Symlinks are not copied.
fn copy_tree(src: &Path, dst: &Path, empty: &[&str]) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());

        if file_type.is_dir() {
            if empty.iter().any(|name| entry.file_name() == *name) {
                fs::create_dir_all(&target)?;
                continue;
            }
            copy_tree(&entry.path(), &target, &[])?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

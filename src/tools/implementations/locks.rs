//! Lock management tools
//!
//! Thin adapters from dispatch parameters onto the shared [`LockTable`].
//! Paths are task-relative; keys are stored workspace-relative.

use crate::errors::Result;
use crate::locks::{task_lock_key, task_scope, LockTable};
use crate::tools::implementations::{optional_positive, optional_str, required_str, run_blocking};
use crate::tools::types::{ExecutionEnvelope, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOp {
    Lock,
    Unlock,
    List,
    Check,
}

pub struct LockTool {
    descriptor: ToolDescriptor,
    op: LockOp,
    locks: Arc<LockTable>,
}

#[async_trait]
impl Tool for LockTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope> {
        match self.op {
            // these two persist the table
            LockOp::Lock | LockOp::Unlock => {
                let (op, locks, ctx) = (self.op, self.locks.clone(), ctx.clone());
                run_blocking(move || match op {
                    LockOp::Lock => Self::file_lock(&locks, &ctx, &params),
                    _ => Self::file_unlock(&locks, &ctx, &params),
                })
                .await
            }
            LockOp::List => self.list_locks(ctx, &params),
            LockOp::Check => self.check_lock(ctx, &params),
        }
    }
}

pub fn lock_tools(locks: Arc<LockTable>) -> Vec<Arc<dyn Tool>> {
    let file_path_schema = |extra: Value| {
        let mut properties = json!({ "file_path": { "type": "string" } });
        if let (Some(target), Value::Object(more)) = (properties.as_object_mut(), extra) {
            target.extend(more);
        }
        json!({ "type": "object", "properties": properties, "required": ["file_path"] })
    };

    let entries = [
        (
            LockOp::Lock,
            ToolDescriptor::local(
                "file_lock",
                "Lock a file against writes by lower-level callers",
                file_path_schema(json!({
                    "level": { "type": "integer", "minimum": 1, "default": 1 },
                    "locker_name": { "type": "string" },
                    "note": { "type": "string" }
                })),
            ),
        ),
        (
            LockOp::Unlock,
            ToolDescriptor::local(
                "file_unlock",
                "Release a file lock",
                file_path_schema(json!({
                    "level": { "type": "integer", "minimum": 0 },
                    "locker_name": { "type": "string" }
                })),
            ),
        ),
        (
            LockOp::List,
            ToolDescriptor::local(
                "list_locks",
                "List active locks for a task or the whole workspace",
                json!({
                    "type": "object",
                    "properties": {
                        "filter_task_id": { "type": "string" },
                        "show_all": { "type": "boolean", "default": false }
                    }
                }),
            ),
        ),
        (
            LockOp::Check,
            ToolDescriptor::local(
                "check_lock",
                "Report whether a file is locked and whether the caller may write it",
                file_path_schema(json!({
                    "level": { "type": "integer", "minimum": 0 },
                    "locker_name": { "type": "string" }
                })),
            ),
        ),
    ];

    entries
        .into_iter()
        .map(|(op, descriptor)| {
            let read_only = matches!(op, LockOp::List | LockOp::Check);
            Arc::new(LockTool {
                descriptor: descriptor.with_read_only(read_only),
                op,
                locks: locks.clone(),
            }) as Arc<dyn Tool>
        })
        .collect()
}

impl LockTool {
    fn file_lock(locks: &LockTable, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let file_path = required_str(params, "file_path")?;
        let locker_name = required_str(params, "locker_name")?;
        let level = optional_positive(params, "level")?.unwrap_or(1);
        let level = u32::try_from(level).unwrap_or(u32::MAX);
        let note = optional_str(params, "note").map(String::from);

        let key = task_lock_key(&ctx.jail, &ctx.task_id, file_path)?;
        let entry = locks.lock(&key, level, locker_name, note)?;

        Ok(ExecutionEnvelope::success(json!({
            "file_path": file_path,
            "lock_path": entry.path,
            "lock_info": entry.record,
        })))
    }

    fn file_unlock(locks: &LockTable, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let file_path = required_str(params, "file_path")?;
        let key = task_lock_key(&ctx.jail, &ctx.task_id, file_path)?;
        let released = locks.unlock(&key, &ctx.requester)?;

        Ok(ExecutionEnvelope::success(json!({
            "file_path": file_path,
            "lock_path": released.path,
            "released_lock": released.record,
        })))
    }

    fn list_locks(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let show_all = params["show_all"].as_bool().unwrap_or(false);
        let filter = optional_str(params, "filter_task_id").unwrap_or(&ctx.task_id);

        let locks = if show_all {
            self.locks.list()?
        } else {
            self.locks.list_under(&task_scope(filter))?
        };

        Ok(ExecutionEnvelope::success(json!({
            "locks": locks,
            "total_count": locks.len(),
            "filter_task_id": if show_all { Value::Null } else { json!(filter) },
        })))
    }

    fn check_lock(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let file_path = required_str(params, "file_path")?;
        let key = task_lock_key(&ctx.jail, &ctx.task_id, file_path)?;
        let current = self.locks.get(&key)?;
        let can_access = self.locks.check_access(&key, &ctx.requester).is_ok();

        Ok(ExecutionEnvelope::success(json!({
            "file_path": file_path,
            "lock_path": key,
            "is_locked": current.is_some(),
            "can_access": can_access,
            "lock_info": current.map(|entry| entry.record),
        })))
    }
}

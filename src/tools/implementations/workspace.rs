//! Workspace management tools
//!
//! Clone or remove whole task workspaces through the [`TaskRegistry`]. The
//! recursive filesystem work runs on the blocking pool.

use crate::errors::{EngineError, Result};
use crate::task::TaskRegistry;
use crate::tools::implementations::{optional_str, string_list};
use crate::tools::types::{ExecutionEnvelope, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceOp {
    Copy,
    Delete,
}

pub struct WorkspaceTool {
    descriptor: ToolDescriptor,
    op: WorkspaceOp,
    tasks: Arc<TaskRegistry>,
}

#[async_trait]
impl Tool for WorkspaceTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope> {
        match self.op {
            WorkspaceOp::Copy => self.workspace_copy(ctx, &params).await,
            WorkspaceOp::Delete => self.workspace_delete(ctx, &params).await,
        }
    }
}

pub fn workspace_tools(tasks: Arc<TaskRegistry>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(WorkspaceTool {
            descriptor: ToolDescriptor::local(
                "workspace_copy",
                "Clone a task workspace into one or more new task ids",
                json!({
                    "type": "object",
                    "properties": {
                        "copyed_taskid": { "type": "string" },
                        "copyid_list": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["copyid_list"]
                }),
            )
            .with_read_only(false),
            op: WorkspaceOp::Copy,
            tasks: tasks.clone(),
        }),
        Arc::new(WorkspaceTool {
            descriptor: ToolDescriptor::local(
                "workspace_delete",
                "Delete other task workspaces and release their locks",
                json!({
                    "type": "object",
                    "properties": {
                        "taskid_list": { "type": "array", "items": { "type": "string" } },
                        "stop_on_error": { "type": "boolean", "default": false }
                    },
                    "required": ["taskid_list"]
                }),
            )
            .with_read_only(false),
            op: WorkspaceOp::Delete,
            tasks,
        }),
    ]
}

impl WorkspaceTool {
    async fn workspace_copy(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let source = optional_str(params, "copyed_taskid")
            .unwrap_or(&ctx.task_id)
            .to_string();
        let targets = string_list(params, "copyid_list");

        let tasks = self.tasks.clone();
        let source_id = source.clone();
        let created = tokio::task::spawn_blocking(move || tasks.copy(&source_id, &targets))
            .await
            .map_err(|e| EngineError::Generic(format!("copy worker failed: {}", e)))??;

        Ok(ExecutionEnvelope::success(json!({
            "source_task": source,
            "copied": created,
            "total_copied": created.len(),
        })))
    }

    async fn workspace_delete(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let targets = string_list(params, "taskid_list");
        if targets.is_empty() {
            return Err(EngineError::Validation("taskid_list must not be empty".to_string()));
        }
        if targets.iter().any(|t| *t == ctx.task_id) {
            return Err(EngineError::Validation(
                "A task cannot delete its own workspace".to_string(),
            ));
        }
        let stop_on_error = params["stop_on_error"].as_bool().unwrap_or(false);

        let mut results = Vec::with_capacity(targets.len());
        let mut deleted_count = 0;
        for target in targets {
            let tasks = self.tasks.clone();
            let id = target.clone();
            let outcome = tokio::task::spawn_blocking(move || tasks.delete(&id))
                .await
                .map_err(|e| EngineError::Generic(format!("delete worker failed: {}", e)))?;

            match outcome {
                Ok(done) => {
                    deleted_count += 1;
                    results.push(json!({
                        "task_id": target,
                        "success": true,
                        "released_locks": done.released_locks,
                    }));
                }
                Err(e) => {
                    warn!(task_id = %target, error = %e, "workspace delete failed");
                    results.push(json!({
                        "task_id": target,
                        "success": false,
                        "error": e.to_string(),
                    }));
                    if stop_on_error {
                        break;
                    }
                }
            }
        }

        let failed_count = results.len() - deleted_count;
        let data = json!({
            "results": results,
            "deleted_count": deleted_count,
            "failed_count": failed_count,
        });
        if failed_count == 0 {
            Ok(ExecutionEnvelope::success(data))
        } else {
            Ok(ExecutionEnvelope::failure(format!(
                "{} of {} workspace deletions failed",
                failed_count,
                deleted_count + failed_count
            ))
            .with_data(data))
        }
    }
}

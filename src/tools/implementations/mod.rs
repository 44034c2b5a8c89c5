//! Local tool implementations

pub mod filesystem;
pub mod locks;
pub mod process;
pub mod workspace;

use crate::errors::{EngineError, Result};
use crate::locks::LockTable;
use crate::task::TaskRegistry;
use crate::tools::supervisor::ProcessSupervisor;
use crate::tools::types::{ExecutionEnvelope, Tool};
use serde_json::Value;
use std::sync::Arc;

/// Every built-in local tool, ready for catalog registration
pub fn local_tools(
    locks: Arc<LockTable>,
    tasks: Arc<TaskRegistry>,
    supervisor: Arc<ProcessSupervisor>,
) -> Vec<Arc<dyn Tool>> {
    let mut tools = filesystem::filesystem_tools();
    tools.extend(locks::lock_tools(locks));
    tools.extend(process::process_tools(supervisor));
    tools.extend(workspace::workspace_tools(tasks));
    tools
}

/// Run a synchronous tool body on the blocking pool.
///
/// A panic in `work` is resumed on the calling task so the dispatcher's panic
/// guard still reports it.
pub(crate) async fn run_blocking<F>(work: F) -> Result<ExecutionEnvelope>
where
    F: FnOnce() -> Result<ExecutionEnvelope> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(EngineError::Generic(format!("blocking worker failed: {}", e))),
    }
}

/// Non-empty string parameter
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params[key].as_str() {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(EngineError::Validation(format!("{} is required", key))),
    }
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params[key].as_str().filter(|v| !v.trim().is_empty())
}

/// Positive integer parameter; `None` when absent
pub(crate) fn optional_positive(params: &Value, key: &str) -> Result<Option<u64>> {
    match &params[key] {
        Value::Null => Ok(None),
        value => match value.as_u64() {
            Some(n) if n >= 1 => Ok(Some(n)),
            _ => Err(EngineError::Validation(format!(
                "{} must be a positive integer",
                key
            ))),
        },
    }
}

/// String list given either as a JSON array or a single string
pub(crate) fn string_list(params: &Value, key: &str) -> Vec<String> {
    match &params[key] {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
            .collect(),
        Value::String(s) => s.split_whitespace().map(String::from).collect(),
        _ => Vec::new(),
    }
}

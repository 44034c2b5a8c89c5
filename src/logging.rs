//! Logging setup
//!
//! Process-wide `tracing` subscriber (stderr, optionally a daily-rolling
//! JSON file) plus the per-task process log kept inside each workspace at
//! `logs/<task_id>_process.log`.

use crate::cli::config::LoggingConfig;
use crate::tools::types::ExecutionEnvelope;
use crate::tools::state::CallState;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const PARAMS_SUMMARY_LEN: usize = 100;
const ERROR_SUMMARY_LEN: usize = 200;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. The returned guard must be
/// held for the life of the process when file output is enabled.
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> anyhow::Result<Option<WorkerGuard>> {
    let level = level_override.unwrap_or(config.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_writer(std::io::stderr);

    let Some(log_dir) = config.log_dir.as_ref() else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
            .ok();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("toolgate")
        .filename_suffix(if config.json { "jsonl" } else { "log" })
        .build(log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    if config.json {
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_current_span(false)
            .with_span_list(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .ok();
    } else {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .ok();
    }

    Ok(Some(guard))
}

/// One line of a task's process log
#[derive(Debug, Serialize)]
pub struct ProcessLogRecord<'a> {
    pub timestamp: String,
    pub tool_name: &'a str,
    pub state: &'a str,
    pub success: bool,
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only JSONL summary of every tool call made against a task
#[derive(Debug, Clone)]
pub struct TaskProcessLog {
    path: PathBuf,
}

impl TaskProcessLog {
    pub fn new(task_root: &Path, task_id: &str) -> Self {
        Self {
            path: task_root.join("logs").join(format!("{}_process.log", task_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a finished call. Calls with `"silent": true` are skipped.
    pub async fn record(
        &self,
        tool_name: &str,
        state: CallState,
        params: &Value,
        envelope: &ExecutionEnvelope,
    ) -> std::io::Result<()> {
        if params["silent"].as_bool().unwrap_or(false) {
            return Ok(());
        }

        let record = ProcessLogRecord {
            timestamp: Utc::now().to_rfc3339(),
            tool_name,
            state: state.as_str(),
            success: envelope.success,
            execution_time: envelope.execution_time.unwrap_or_default(),
            params: summarize_params(params),
            error: envelope
                .error
                .as_deref()
                .map(|e| truncate(e, ERROR_SUMMARY_LEN)),
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        // the workspace may have been deleted by the call itself
        if !dir.exists() {
            return Ok(());
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

fn summarize_params(params: &Value) -> Option<String> {
    let Value::Object(map) = params else {
        return None;
    };
    let filtered: serde_json::Map<String, Value> = map
        .iter()
        .filter(|(k, _)| k.as_str() != "task_id")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if filtered.is_empty() {
        return None;
    }
    Some(truncate(&Value::Object(filtered).to_string(), PARAMS_SUMMARY_LEN))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_process_log_appends_lines() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("logs")).unwrap();
        let log = TaskProcessLog::new(temp.path(), "demo");

        let ok = ExecutionEnvelope::success(json!({})).stamped("demo", "file_read", Duration::from_millis(3));
        let failed = ExecutionEnvelope::failure("File not found: x").stamped(
            "demo",
            "file_read",
            Duration::from_millis(1),
        );
        log.record("file_read", CallState::Succeeded, &json!({"file_path": "a.txt"}), &ok)
            .await
            .unwrap();
        log.record("file_read", CallState::Failed, &json!({"file_path": "x"}), &failed)
            .await
            .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["state"], "succeeded");
        assert_eq!(lines[1]["error"], "File not found: x");
        assert!(lines[0]["params"].as_str().unwrap().contains("a.txt"));
    }

    #[tokio::test]
    async fn test_silent_calls_are_not_logged() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("logs")).unwrap();
        let log = TaskProcessLog::new(temp.path(), "demo");

        let ok = ExecutionEnvelope::success(json!({}));
        log.record("dir_list", CallState::Succeeded, &json!({"silent": true}), &ok)
            .await
            .unwrap();
        assert!(!log.path().exists());
    }

    #[test]
    fn test_params_summary_truncated() {
        let long = "x".repeat(500);
        let summary = summarize_params(&json!({"content": long, "task_id": "demo"})).unwrap();
        assert!(summary.ends_with("..."));
        assert!(!summary.contains("task_id"));
        assert_eq!(summary.chars().count(), PARAMS_SUMMARY_LEN + 3);
    }
}

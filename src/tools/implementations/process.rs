//! Process tool implementations
//!
//! Every subprocess goes through the shared [`ProcessSupervisor`], which
//! bounds concurrency, enforces the call timeout and kills the whole process
//! group when it expires:
//! - execute_code: run a Python file with the task's interpreter
//! - execute_shell: run a shell command line
//! - pip_install: install packages into the task's `code_env`

use crate::errors::{EngineError, Result};
use crate::tools::implementations::{optional_str, required_str, string_list};
use crate::tools::supervisor::{ProcessOutput, ProcessSupervisor};
use crate::tools::types::{ExecutionEnvelope, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

const SYSTEM_PYTHON: &str = "python3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessOp {
    ExecuteCode,
    ExecuteShell,
    PipInstall,
}

pub struct ProcessTool {
    descriptor: ToolDescriptor,
    op: ProcessOp,
    supervisor: Arc<ProcessSupervisor>,
}

#[async_trait]
impl Tool for ProcessTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope> {
        match self.op {
            ProcessOp::ExecuteCode => self.execute_code(ctx, &params).await,
            ProcessOp::ExecuteShell => self.execute_shell(ctx, &params).await,
            ProcessOp::PipInstall => self.pip_install(ctx, &params).await,
        }
    }
}

pub fn process_tools(supervisor: Arc<ProcessSupervisor>) -> Vec<Arc<dyn Tool>> {
    let timeout = json!({ "type": "integer", "minimum": 1 });
    let entries = [
        (
            ProcessOp::ExecuteCode,
            ToolDescriptor::local(
                "execute_code",
                "Run a Python file from the task workspace in code_run/",
                json!({
                    "type": "object",
                    "properties": { "file_path": { "type": "string" }, "timeout": timeout },
                    "required": ["file_path"]
                }),
            ),
        ),
        (
            ProcessOp::ExecuteShell,
            ToolDescriptor::local(
                "execute_shell",
                "Run a shell command inside the task workspace",
                json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" },
                        "workdir": { "type": "string", "default": "code_run" },
                        "timeout": timeout
                    },
                    "required": ["command"]
                }),
            ),
        ),
        (
            ProcessOp::PipInstall,
            ToolDescriptor::local(
                "pip_install",
                "Install Python packages into the task virtualenv",
                json!({
                    "type": "object",
                    "properties": {
                        "packages": { "type": "array", "items": { "type": "string" } },
                        "timeout": timeout
                    },
                    "required": ["packages"]
                }),
            ),
        ),
    ];

    entries
        .into_iter()
        .map(|(op, descriptor)| {
            Arc::new(ProcessTool {
                descriptor: descriptor.with_process(),
                op,
                supervisor: supervisor.clone(),
            }) as Arc<dyn Tool>
        })
        .collect()
}

impl ProcessTool {
    async fn execute_code(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let file_path = required_str(params, "file_path")?;
        let script = ctx.jail.resolve(file_path)?;
        if !script.is_file() {
            return Ok(ExecutionEnvelope::failure(format!("File not found: {}", file_path)));
        }

        let run_dir = ensure_dir(ctx, "code_run").await?;
        let mut command = Command::new(python_for(ctx.jail.jail_root()));
        command.arg(&script).current_dir(&run_dir);
        with_env_path(&mut command, ctx.jail.jail_root());

        let output = self.supervisor.run(command, ctx.timeout).await?;
        info!(task_id = %ctx.task_id, file_path, exit_code = output.exit_code, "code executed");
        Ok(process_envelope(output, json!({ "executed_file": file_path })))
    }

    async fn execute_shell(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let command_line = required_str(params, "command")?;
        let workdir = optional_str(params, "workdir").unwrap_or("code_run");
        let work_path = ensure_dir(ctx, workdir).await?;

        let mut command = shell_command(command_line);
        command.current_dir(&work_path);
        with_env_path(&mut command, ctx.jail.jail_root());

        let output = self.supervisor.run(command, ctx.timeout).await?;
        debug!(task_id = %ctx.task_id, exit_code = output.exit_code, "shell command finished");
        Ok(process_envelope(
            output,
            json!({ "command": command_line, "workdir": workdir }),
        ))
    }

    /// Creates `code_env` on first use, then installs each package in turn.
    /// The call timeout covers the whole sequence.
    async fn pip_install(&self, ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
        let packages = string_list(params, "packages");
        if packages.is_empty() {
            return Err(EngineError::Validation("packages is required".to_string()));
        }

        let deadline = Instant::now() + ctx.timeout;
        let root = ctx.jail.jail_root();
        let venv = root.join("code_env");
        let pip = venv.join("bin").join("pip");

        if !pip.exists() {
            if venv.exists() {
                tokio::fs::remove_dir_all(&venv).await?;
            }
            let mut command = Command::new(SYSTEM_PYTHON);
            command.arg("-m").arg("venv").arg(&venv).current_dir(root);
            let output = self.supervisor.run(command, remaining(deadline, ctx.timeout)?).await?;
            if output.exit_code != 0 {
                return Ok(ExecutionEnvelope::failure(format!(
                    "Failed to create virtual environment: {}",
                    output.stderr.trim()
                )));
            }
            if !pip.exists() {
                return Ok(ExecutionEnvelope::failure(format!(
                    "pip not found after creating virtual environment: {}",
                    pip.display()
                )));
            }
            info!(task_id = %ctx.task_id, "virtual environment created");
        }

        let mut results = Vec::with_capacity(packages.len());
        for package in &packages {
            let mut command = Command::new(&pip);
            command.arg("install").arg(package).current_dir(root);
            let output = self.supervisor.run(command, remaining(deadline, ctx.timeout)?).await?;
            results.push(json!({
                "package": package,
                "success": output.exit_code == 0,
                "stdout": output.stdout,
                "stderr": output.stderr,
            }));
        }

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| r["success"] == false)
            .filter_map(|r| r["package"].as_str())
            .collect();
        let data = json!({ "results": results });

        if failed.is_empty() {
            Ok(ExecutionEnvelope::success(data))
        } else {
            Ok(ExecutionEnvelope::failure(format!(
                "Failed to install: {}",
                failed.join(", ")
            ))
            .with_data(data))
        }
    }
}

/// Interpreter for task code: the task virtualenv when present
fn python_for(task_root: &Path) -> PathBuf {
    let venv_python = task_root.join("code_env").join("bin").join("python");
    if venv_python.exists() {
        venv_python
    } else {
        PathBuf::from(SYSTEM_PYTHON)
    }
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

/// Put the task virtualenv's `bin/` first on PATH
fn with_env_path(command: &mut Command, task_root: &Path) {
    let bin = task_root.join("code_env").join("bin");
    if !bin.is_dir() {
        return;
    }
    let mut paths = vec![bin];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    if let Ok(joined) = std::env::join_paths(paths) {
        command.env("PATH", joined);
    }
}

async fn ensure_dir(ctx: &ToolContext, relative: &str) -> Result<PathBuf> {
    let path = ctx.jail.resolve(relative)?;
    tokio::fs::create_dir_all(&path).await?;
    Ok(path)
}

fn remaining(deadline: Instant, budget: Duration) -> Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(EngineError::Timeout {
            seconds: budget.as_secs().max(1),
        });
    }
    Ok(left)
}

fn process_envelope(output: ProcessOutput, mut extra: Value) -> ExecutionEnvelope {
    if let Value::Object(map) = &mut extra {
        map.insert("exit_code".to_string(), json!(output.exit_code));
        map.insert("stdout".to_string(), json!(output.stdout));
        map.insert("stderr".to_string(), json!(output.stderr));
        map.insert(
            "duration_ms".to_string(),
            json!(output.duration.as_millis() as u64),
        );
    }
    ExecutionEnvelope::with_exit_code(output.exit_code, extra)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ToolContext, Vec<Arc<dyn Tool>>) {
        let temp = TempDir::new().unwrap();
        let ctx = ToolContext::new("demo", temp.path()).unwrap();
        let tools = process_tools(Arc::new(ProcessSupervisor::new(2, 4096)));
        (temp, ctx, tools)
    }

    fn find<'a>(tools: &'a [Arc<dyn Tool>], name: &str) -> &'a Arc<dyn Tool> {
        tools.iter().find(|t| t.descriptor().name == name).unwrap()
    }

    #[tokio::test]
    async fn test_shell_runs_in_code_run() {
        let (temp, ctx, tools) = setup();
        let envelope = find(&tools, "execute_shell")
            .execute(&ctx, json!({"command": "pwd; echo made > out.txt"}))
            .await
            .unwrap();

        assert!(envelope.success);
        let data = envelope.data.unwrap();
        assert_eq!(data["exit_code"], 0);
        assert!(data["stdout"].as_str().unwrap().trim().ends_with("code_run"));
        assert!(temp.path().join("code_run/out.txt").exists());
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_keeps_output() {
        let (_temp, ctx, tools) = setup();
        let envelope = find(&tools, "execute_shell")
            .execute(&ctx, json!({"command": "echo bad >&2; exit 4", "workdir": "upload"}))
            .await
            .unwrap();

        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("Process exited with code 4"));
        assert_eq!(envelope.data.unwrap()["stderr"].as_str().unwrap().trim(), "bad");
    }

    #[tokio::test]
    async fn test_shell_timeout_is_error() {
        let (temp, ctx, tools) = setup();
        let ctx = ctx.with_timeout(Duration::from_secs(1));
        let err = find(&tools, "execute_shell")
            .execute(&ctx, json!({"command": "sleep 3; touch late.txt"}))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Timeout { seconds: 1 }));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!temp.path().join("code_run/late.txt").exists());
    }

    #[tokio::test]
    async fn test_shell_workdir_is_jailed() {
        let (_temp, ctx, tools) = setup();
        let err = find(&tools, "execute_shell")
            .execute(&ctx, json!({"command": "true", "workdir": "../.."}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_execute_code_missing_file() {
        let (_temp, ctx, tools) = setup();
        let envelope = find(&tools, "execute_code")
            .execute(&ctx, json!({"file_path": "code_run/none.py"}))
            .await
            .unwrap();
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().starts_with("File not found"));
    }

    #[tokio::test]
    async fn test_pip_install_requires_packages() {
        let (_temp, ctx, tools) = setup();
        let err = find(&tools, "pip_install")
            .execute(&ctx, json!({"packages": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_python_prefers_virtualenv() {
        let temp = TempDir::new().unwrap();
        assert_eq!(python_for(temp.path()), PathBuf::from(SYSTEM_PYTHON));

        std::fs::create_dir_all(temp.path().join("code_env/bin")).unwrap();
        std::fs::write(temp.path().join("code_env/bin/python"), "").unwrap();
        assert!(python_for(temp.path()).ends_with("code_env/bin/python"));
    }
}

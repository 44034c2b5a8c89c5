//! Tool execution types and structures
//!
//! The envelope every dispatch returns, tool descriptors, the per-call
//! context handed to tools, and the `Tool` capability trait.

use crate::errors::{EngineError, Result};
use crate::locks::Requester;
use crate::tools::security::PathJail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Uniform result of every dispatch call, local or proxied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    /// Whether the tool reported success
    pub success: bool,

    /// Tool output
    #[serde(default)]
    pub data: Option<Value>,

    /// Failure description
    #[serde(default)]
    pub error: Option<String>,

    /// When the envelope was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Wall-clock seconds spent in the dispatcher
    #[serde(default)]
    pub execution_time: Option<f64>,

    #[serde(default)]
    pub task_id: Option<String>,

    #[serde(default)]
    pub tool_name: Option<String>,
}

impl ExecutionEnvelope {
    /// Create successful envelope
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            execution_time: None,
            task_id: None,
            tool_name: None,
        }
    }

    /// Create failed envelope
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
            execution_time: None,
            task_id: None,
            tool_name: None,
        }
    }

    /// Failure envelope for an engine error; lock denials carry the lock
    pub fn from_error(err: &EngineError) -> Self {
        let envelope = Self::failure(err.to_string());
        match err {
            EngineError::AccessDenied {
                path,
                locker_name,
                level,
            } => envelope.with_data(json!({
                "locked_file": path,
                "lock_info": { "locker_name": locker_name, "level": level },
            })),
            _ => envelope,
        }
    }

    /// Envelope for a finished subprocess; non-zero exit is a failure
    pub fn with_exit_code(exit_code: i32, data: Value) -> Self {
        if exit_code == 0 {
            Self::success(data)
        } else {
            Self::failure(format!("Process exited with code {}", exit_code)).with_data(data)
        }
    }

    /// Attach data (kept on failures for diagnostics)
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Stamp correlation fields and timing at the dispatch boundary
    pub fn stamped(mut self, task_id: &str, tool_name: &str, elapsed: Duration) -> Self {
        self.task_id = Some(task_id.to_string());
        self.tool_name = Some(tool_name.to_string());
        self.execution_time = Some(elapsed.as_secs_f64());
        self.timestamp = Utc::now();
        self
    }

    /// Build an envelope from loosely-shaped JSON returned by a peer service.
    ///
    /// Peers may use `message` instead of `error` and their own timestamp
    /// formats; only `success`, `data` and the error text are taken.
    pub fn from_remote(value: Value) -> Self {
        let success = value["success"].as_bool().unwrap_or(false);
        let data = value.get("data").filter(|d| !d.is_null()).cloned();
        let error = value["error"]
            .as_str()
            .or_else(|| value["message"].as_str())
            .map(String::from);

        let mut envelope = if success {
            Self::success(Value::Null)
        } else {
            Self::failure(error.unwrap_or_else(|| "Remote tool reported failure".to_string()))
        };
        envelope.data = data;
        envelope
    }
}

/// Where a tool executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Local,
    Proxy,
}

/// Catalog entry describing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name (unique across the catalog)
    pub name: String,

    pub kind: ToolKind,

    pub version: String,

    pub description: String,

    /// Parameter schema (JSON Schema)
    pub parameters: Value,

    /// Whether the tool leaves the workspace untouched
    pub read_only: bool,

    /// Parameters naming workspace paths the tool mutates; each one is
    /// checked against the lock table before the tool runs
    #[serde(default)]
    pub path_params: Vec<String>,

    /// Runs a supervised subprocess bound by the call timeout
    #[serde(default)]
    pub spawns_process: bool,
}

impl ToolDescriptor {
    /// Create a read-only local descriptor
    pub fn local(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ToolKind::Local,
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
            parameters,
            read_only: true,
            path_params: Vec::new(),
            spawns_process: false,
        }
    }

    /// Create a descriptor for a tool living on the peer service
    pub fn proxy(name: impl Into<String>, base_url: &str) -> Self {
        Self {
            name: name.into(),
            kind: ToolKind::Proxy,
            version: "remote".to_string(),
            description: format!("Forwarded to {}", base_url),
            parameters: json!({ "type": "object" }),
            read_only: false,
            path_params: Vec::new(),
            spawns_process: false,
        }
    }

    /// Declare the path parameters this tool writes through
    pub fn with_path_params(mut self, params: &[&str]) -> Self {
        self.path_params = params.iter().map(|p| p.to_string()).collect();
        self.read_only = false;
        self
    }

    /// Mark the tool as spawning a subprocess
    pub fn with_process(mut self) -> Self {
        self.spawns_process = true;
        self.read_only = false;
        self
    }

    /// Override read-only classification
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn mutates_files(&self) -> bool {
        !self.path_params.is_empty()
    }
}

/// Per-call execution context
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_id: String,

    /// Task workspace root
    pub task_root: PathBuf,

    /// Jail over the task root
    pub jail: PathJail,

    /// Identity presented by the caller
    pub requester: Requester,

    /// Bound for subprocess-spawning tools
    pub timeout: Duration,

    /// Maximum bytes returned from reads and captured process output
    pub max_output_size: usize,
}

impl ToolContext {
    /// Create context for a task rooted at `task_root`
    pub fn new(task_id: impl Into<String>, task_root: impl Into<PathBuf>) -> Result<Self> {
        let task_root = task_root.into();
        let jail = PathJail::new(&task_root)?;
        Ok(Self {
            task_id: task_id.into(),
            task_root,
            jail,
            requester: Requester::default(),
            timeout: Duration::from_secs(300),
            max_output_size: 2_097_152, // 2MB
        })
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max output size
    pub fn with_max_output_size(mut self, size: usize) -> Self {
        self.max_output_size = size;
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }
}

/// A named capability invoked with task-scoped parameters.
///
/// Tool-level failures are returned as `Ok` failure envelopes; `Err` is
/// reserved for faults the dispatcher should classify (timeouts, lock
/// denials, I/O).
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope>;
}

/// Dispatch statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolStats {
    pub total_calls: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub total_duration_ms: u64,
}

impl ToolStats {
    pub fn record(&mut self, success: bool, timed_out: bool, duration: Duration) {
        self.total_calls += 1;
        self.total_duration_ms += duration.as_millis() as u64;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if timed_out {
                self.timed_out += 1;
            }
        }
    }
}

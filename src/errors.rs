//! Error types for toolgate
//!
//! One taxonomy shared by every layer. Inside the engine errors travel with
//! `?`; at the dispatch boundary each one is folded into a failure envelope.

use thiserror::Error;

/// Main error type for the dispatch engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown tool, missing task, malformed parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lock arbitration refused the requester
    #[error("Access denied: {path} is locked by '{locker_name}' at level {level}")]
    AccessDenied {
        path: String,
        locker_name: String,
        level: u32,
    },

    /// Tool-internal fault, non-zero exit or remote-reported failure
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Per-call time bound exceeded; the process group has been killed
    #[error("Execution timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Network-level failure talking to the remote tool service
    #[error("proxy_unreachable: {0}")]
    ProxyUnreachable(String),

    /// Call state machine violation
    #[error("Invalid call state transition from {from} via {event}")]
    InvalidTransition { from: String, event: String },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic errors with context
    #[error("Engine error: {0}")]
    Generic(String),
}

impl EngineError {
    /// Short machine-readable class name, used in HTTP error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::AccessDenied { .. } => "access_denied",
            EngineError::Execution(_) => "execution_failure",
            EngineError::Timeout { .. } => "timeout",
            EngineError::ProxyUnreachable(_) => "proxy_unreachable",
            EngineError::InvalidTransition { .. } => "internal_error",
            EngineError::HttpError(_) => "http_error",
            EngineError::SerializationError(_) => "serialization_error",
            EngineError::IoError(_) => "io_error",
            EngineError::ConfigError(_) => "config_error",
            EngineError::Generic(_) => "internal_error",
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Convert anyhow errors to EngineError
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Generic(err.to_string())
    }
}

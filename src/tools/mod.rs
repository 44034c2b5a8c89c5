//! Tool execution system
//!
//! - Envelope, descriptor and context types plus the `Tool` trait
//! - Path jail confining every tool to its task workspace
//! - Call state machine
//! - Process supervisor (bounded, timeout-enforced subprocesses)
//! - Catalog of local and proxy tools
//! - Dispatcher: the single entry point for tool calls
//! - Retry manager for idempotent peer calls

pub mod types;
pub mod security;
pub mod state;
pub mod supervisor;
pub mod retry;
pub mod catalog;
pub mod dispatcher;
pub mod implementations;

// Re-export commonly used types
pub use types::{ExecutionEnvelope, Tool, ToolContext, ToolDescriptor, ToolKind, ToolStats};
pub use security::PathJail;
pub use state::{CallEvent, CallState};
pub use supervisor::ProcessSupervisor;
pub use retry::RetryManager;
pub use catalog::{CatalogInfo, ToolCatalog};
pub use dispatcher::Dispatcher;

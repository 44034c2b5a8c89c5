//! toolgate - tool dispatch and isolation engine
//!
//! Executes named tool calls inside per-task workspaces and returns a
//! uniform execution envelope for every call.
//!
//! # Architecture
//!
//! - **task**: task workspaces on disk
//! - **locks**: persisted file-lock arbitration
//! - **tools**: catalog, dispatcher, local tool implementations
//! - **proxy**: forwarding to the peer tool service
//! - **server**: HTTP surface
//! - **engine**: wires the above together from configuration

pub mod errors;
pub mod logging;
pub mod cli;
pub mod locks;
pub mod task;
pub mod tools;
pub mod proxy;
pub mod engine;
pub mod server;

// Re-export commonly used types
pub use errors::{EngineError, Result};
pub use engine::Engine;
pub use tools::{Dispatcher, ExecutionEnvelope};

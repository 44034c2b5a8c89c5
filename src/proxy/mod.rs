//! Peer tool service bridge
//!
//! Wire types for the execute/list/health contract and the HTTP client that
//! forwards calls for tools the engine does not implement locally.

pub mod bridge;
pub mod wire;

pub use bridge::{ProxyBridge, ProxyTool};
pub use wire::{DispatchRequest, HealthResponse, ToolListResponse};

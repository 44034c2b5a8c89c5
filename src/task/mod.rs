//! Task lifecycle
//!
//! Creation, deletion, listing and status of isolated task workspaces.

pub mod types;
pub mod registry;

pub use types::{AreaUsage, TaskCreated, TaskDeleted, TaskInfo, TaskStatus, TASK_AREAS};
pub use registry::{validate_task_id, TaskRegistry};

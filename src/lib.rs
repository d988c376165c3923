//! Decentralized task coordination over a shared filesystem workspace.
//!
//! Tasks live as directories under `current_tasks/`; agents are independent
//! processes that poll, claim optimistically, execute, and report back
//! through the same files. A git history over the workspace serves as the
//! audit trail. There is no coordinator and no message bus; the filesystem
//! is the only shared medium.

pub mod agent;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod planner;
pub mod recovery;
pub mod store;
pub mod summary;
pub mod types;

pub use error::{Result, SwarmError};
pub use store::TaskStore;
pub use types::{ActionResult, AgentType, TaskRecord, TaskStatus};

//! Error taxonomy for store, claim, and execution operations.
//!
//! Store and claim errors are local and recoverable: callers decide whether
//! to retry on the next poll cycle. Only a workspace that cannot be opened
//! at all is fatal to an agent process.

use crate::types::TaskStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    /// Referenced task is absent. Callers treat this as "nothing to do".
    #[error("task not found: {0}")]
    NotFound(String),

    /// Creation collision on an existing task directory.
    #[error("task already exists: {0}")]
    AlreadyExists(String),

    /// Another agent holds (or raced us to) the claim.
    #[error("task {task_id} already claimed by {holder}")]
    ClaimConflict { task_id: String, holder: String },

    /// Task is not in a claimable state.
    #[error("task {task_id} is not claimable (status: {status})")]
    NotClaimable { task_id: String, status: TaskStatus },

    /// Agent capability does not match the task's declared agent type.
    #[error("task {task_id} needs agent type {needed}, not {offered}")]
    CapabilityMismatch {
        task_id: String,
        needed: String,
        offered: String,
    },

    /// Status write that skips or reverses the state machine.
    #[error("illegal transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Record-level validation failure (immutable id, regressing progress
    /// or retry_count, dependency-gating violation).
    #[error("validation failed for {task_id}: {reason}")]
    Validation { task_id: String, reason: String },

    /// A task record file is malformed. Scans skip these with a warning.
    #[error("malformed task record at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Domain action reported failure.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// Command or script exceeded its wall-clock budget.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// Audit commit could not be created. Logged and swallowed by the
    /// store; never propagated to mutation callers.
    #[error("audit log failure: {0}")]
    Audit(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        SwarmError::Validation {
            task_id: String::new(),
            reason: format!("serialization failed: {}", e),
        }
    }
}

impl SwarmError {
    /// Whether a claim attempt failing with this error should simply be
    /// skipped (another agent got there first, or the record changed).
    pub fn is_claim_skip(&self) -> bool {
        matches!(
            self,
            SwarmError::ClaimConflict { .. }
                | SwarmError::NotClaimable { .. }
                | SwarmError::CapabilityMismatch { .. }
                | SwarmError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;

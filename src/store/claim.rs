//! Claim protocol implementations.
//!
//! [`OptimisticClaimer`] is the default: read the record, check it is
//! claimable, write the claim. Two agents can pass the check concurrently
//! and both write; the second write wins and the first agent works a task
//! it no longer holds. The design accepts this race; work is idempotent
//! enough that duplicate execution wastes effort but corrupts nothing.
//!
//! [`MarkerClaimer`] closes the race on filesystems with atomic
//! `create_new`: a `claim.lock` file in the task directory acts as a
//! compare-and-swap, so exactly one claimant succeeds.

use super::{TaskStore, CLAIM_MARKER_FILE};
use crate::error::{Result, SwarmError};
use crate::types::{AgentType, TaskRecord, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use tracing::debug;

pub trait ClaimStore: Send + Sync {
    /// Attempt to claim `task_id` for `agent_id`. On success the returned
    /// record is `claimed` with `claimed_by`/`claimed_at` set. Errors for
    /// which [`SwarmError::is_claim_skip`] holds mean "move on to the next
    /// candidate", not "abort the scan".
    fn try_claim(
        &self,
        store: &TaskStore,
        task_id: &str,
        agent_id: &str,
        capability: &AgentType,
    ) -> Result<TaskRecord>;

    /// Voluntarily give the claim back, returning the task to `available`.
    fn release(&self, store: &TaskStore, task_id: &str, agent_id: &str) -> Result<TaskRecord>;
}

fn check_claimable(record: &TaskRecord, capability: &AgentType) -> Result<()> {
    if record.status != TaskStatus::Available {
        if let Some(holder) = &record.claimed_by {
            return Err(SwarmError::ClaimConflict {
                task_id: record.task_id.clone(),
                holder: holder.clone(),
            });
        }
        return Err(SwarmError::NotClaimable {
            task_id: record.task_id.clone(),
            status: record.status,
        });
    }
    if !record.capability_matches(capability) {
        return Err(SwarmError::CapabilityMismatch {
            task_id: record.task_id.clone(),
            needed: record.agent_type.to_string(),
            offered: capability.to_string(),
        });
    }
    Ok(())
}

/// Read-check-write claiming. Last writer wins under contention.
pub struct OptimisticClaimer;

impl ClaimStore for OptimisticClaimer {
    fn try_claim(
        &self,
        store: &TaskStore,
        task_id: &str,
        agent_id: &str,
        capability: &AgentType,
    ) -> Result<TaskRecord> {
        let record = store.read(task_id)?;
        check_claimable(&record, capability)?;
        let claimed = store.update(task_id, "Task Claimed", |t| {
            t.status = TaskStatus::Claimed;
            t.claimed_by = Some(agent_id.to_string());
            t.claimed_at = Some(Utc::now());
        })?;
        debug!(task_id, agent_id, "claim written");
        Ok(claimed)
    }

    fn release(&self, store: &TaskStore, task_id: &str, agent_id: &str) -> Result<TaskRecord> {
        let record = store.read(task_id)?;
        if record.claimed_by.as_deref() != Some(agent_id) {
            return Err(SwarmError::Validation {
                task_id: task_id.to_string(),
                reason: format!("release by non-holder (held by {:?})", record.claimed_by),
            });
        }
        store.force_release(task_id)
    }
}

#[derive(Serialize, Deserialize)]
struct ClaimMarker {
    agent_id: String,
    claimed_at: chrono::DateTime<Utc>,
}

/// Marker-file claiming: `claim.lock` created with `create_new` is the
/// atomic point of the protocol. Requires a filesystem where exclusive
/// create is atomic (any local filesystem; not NFSv2).
pub struct MarkerClaimer;

impl ClaimStore for MarkerClaimer {
    fn try_claim(
        &self,
        store: &TaskStore,
        task_id: &str,
        agent_id: &str,
        capability: &AgentType,
    ) -> Result<TaskRecord> {
        let record = store.read(task_id)?;
        check_claimable(&record, capability)?;

        let marker_path = store.task_dir(task_id).join(CLAIM_MARKER_FILE);
        let marker = ClaimMarker {
            agent_id: agent_id.to_string(),
            claimed_at: Utc::now(),
        };
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&marker_path)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<ClaimMarker>(&raw).ok())
                    .map(|m| m.agent_id)
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(SwarmError::ClaimConflict {
                    task_id: task_id.to_string(),
                    holder,
                });
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(&marker)?.as_bytes())?;

        // Marker held; the record write below cannot race another claimant.
        let claimed = store.update(task_id, "Task Claimed", |t| {
            t.status = TaskStatus::Claimed;
            t.claimed_by = Some(agent_id.to_string());
            t.claimed_at = Some(marker.claimed_at);
        });
        match claimed {
            Ok(record) => {
                debug!(task_id, agent_id, "exclusive claim taken");
                Ok(record)
            }
            Err(e) => {
                store.remove_claim_marker(task_id);
                Err(e)
            }
        }
    }

    fn release(&self, store: &TaskStore, task_id: &str, agent_id: &str) -> Result<TaskRecord> {
        let record = store.read(task_id)?;
        if record.claimed_by.as_deref() != Some(agent_id) {
            return Err(SwarmError::Validation {
                task_id: task_id.to_string(),
                reason: format!("release by non-holder (held by {:?})", record.claimed_by),
            });
        }
        store.force_release(task_id)
    }
}

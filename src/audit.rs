//! Version-control audit log over the task store.
//!
//! Every store mutation stages the affected task subtree and records a
//! commit `"{prefix} {action}: {summary}"`. The audit log is a secondary
//! guarantee, not the source of truth: commit failures are logged and
//! swallowed, and there are no rollback semantics; recovery after a crash
//! relies on the state machine's re-claim rules, not on git revert.
//!
//! `AuditSink` is a trait so the core never depends on a specific
//! version-control tool; an append-only file log would be an equally valid
//! implementation.

use crate::error::{Result, SwarmError};
use chrono::{DateTime, TimeZone, Utc};
use git2::{IndexAddOption, Repository, Signature};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// One entry from the audit history, newest first.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-commit / read-history interface layered over the task store.
pub trait AuditSink: Send + Sync {
    /// Record a mutation touching `paths` (relative to the workspace root).
    /// Must never fail the caller: errors are logged and swallowed.
    fn record(&self, action: &str, summary: &str, paths: &[&Path]);

    /// Most recent entries, newest first.
    fn history(&self, limit: usize) -> Vec<AuditEntry>;
}

/// No-op sink for tests and audit-less deployments.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _action: &str, _summary: &str, _paths: &[&Path]) {}

    fn history(&self, _limit: usize) -> Vec<AuditEntry> {
        Vec::new()
    }
}

/// Git-backed audit log wrapping the workspace directory.
pub struct GitAuditLog {
    repo: Mutex<Repository>,
    prefix: String,
}

impl GitAuditLog {
    /// Open the repository at the workspace root, clone it from `remote`
    /// if configured, or initialize a fresh one with a seed commit.
    pub fn open(root: &Path, prefix: &str, remote: Option<&str>) -> Result<Self> {
        let repo = if root.join(".git").exists() {
            Repository::open(root).map_err(|e| SwarmError::Audit(e.to_string()))?
        } else if let Some(url) = remote {
            info!(url, "cloning workspace repository");
            Repository::clone(url, root).map_err(|e| SwarmError::Audit(e.to_string()))?
        } else {
            info!(root = %root.display(), "initializing workspace repository");
            let repo = Repository::init(root).map_err(|e| SwarmError::Audit(e.to_string()))?;
            seed_commit(&repo, root, prefix).map_err(|e| SwarmError::Audit(e.to_string()))?;
            repo
        };
        Ok(Self {
            repo: Mutex::new(repo),
            prefix: prefix.to_string(),
        })
    }

    fn try_record(&self, message: &str, paths: &[&Path]) -> std::result::Result<bool, git2::Error> {
        let repo = self.repo.lock().unwrap_or_else(|p| p.into_inner());
        let mut index = repo.index()?;
        for &path in paths {
            // add_all picks up new/changed files, update_all picks up
            // deletions, so archive/delete mutations stage correctly.
            index.add_all([path], IndexAddOption::DEFAULT, None)?;
            index.update_all([path], None)?;
        }
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        if let Some(ref p) = parent {
            if p.tree_id() == tree_id {
                // Nothing staged; skip the empty commit.
                return Ok(false);
            }
        }

        let sig = Signature::now("task-swarm", "task-swarm@localhost")?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(true)
    }
}

impl AuditSink for GitAuditLog {
    fn record(&self, action: &str, summary: &str, paths: &[&Path]) {
        let message = format!("{} {}: {}", self.prefix, action, summary);
        match self.try_record(&message, paths) {
            Ok(true) => debug!(action, summary, "audit commit recorded"),
            Ok(false) => debug!(action, "audit commit skipped, nothing staged"),
            Err(e) => warn!(action, error = %e, "audit commit failed (ignored)"),
        }
    }

    fn history(&self, limit: usize) -> Vec<AuditEntry> {
        let repo = self.repo.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries = Vec::new();
        let mut walk = match repo.revwalk() {
            Ok(w) => w,
            Err(_) => return entries,
        };
        if walk.push_head().is_err() {
            return entries;
        }
        for oid in walk.take(limit) {
            let Ok(oid) = oid else { break };
            let Ok(commit) = repo.find_commit(oid) else {
                break;
            };
            entries.push(AuditEntry {
                id: oid.to_string()[..8].to_string(),
                message: commit.message().unwrap_or("").trim_end().to_string(),
                timestamp: Utc
                    .timestamp_opt(commit.time().seconds(), 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            });
        }
        entries
    }
}

/// Seed a fresh repository so later commits always have a parent tree to
/// diff against.
fn seed_commit(repo: &Repository, root: &Path, prefix: &str) -> std::result::Result<(), git2::Error> {
    let readme = root.join("README.md");
    if !readme.exists() {
        let body = "# Task workspace\n\n\
                    Shared task queue for autonomous agents. Each commit is one\n\
                    task store mutation; the history is the audit trail.\n";
        if let Err(e) = std::fs::write(&readme, body) {
            warn!(error = %e, "could not write workspace README");
        }
    }
    let mut index = repo.index()?;
    index.add_all(["README.md"], IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let sig = Signature::now("task-swarm", "task-swarm@localhost")?;
    repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        &format!("{} init: task workspace", prefix),
        &tree,
        &[],
    )?;
    Ok(())
}

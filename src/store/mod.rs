//! Directory-tree task store.
//!
//! Each task is a sub-directory under `current_tasks/` holding `task.json`
//! (the record) and `progress.log` (append-only, human-readable). Archived
//! tasks move to `completed_tasks/`. There is no locking: readers may
//! observe a record mid-write from another process, and the read-modify-write
//! in [`TaskStore::update`] is last-writer-wins by design. Every write is an
//! isolated single-task mutation; nothing here is atomic across tasks.

pub mod claim;

use crate::audit::AuditSink;
use crate::error::{Result, SwarmError};
use crate::types::{Signal, TaskRecord, TaskStatus};
use chrono::Utc;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CURRENT_TASKS_DIR: &str = "current_tasks";
pub const COMPLETED_TASKS_DIR: &str = "completed_tasks";
pub const SEARCH_RESULTS_DIR: &str = "search_results";
pub const AGENT_SIGNALS_DIR: &str = "agent_signals";

const RECORD_FILE: &str = "task.json";
const LOG_FILE: &str = "progress.log";
pub(crate) const CLAIM_MARKER_FILE: &str = "claim.lock";

pub struct TaskStore {
    root: PathBuf,
    audit: Box<dyn AuditSink>,
}

impl TaskStore {
    /// Open (creating if needed) the workspace directory layout. Failure
    /// here is the one fatal startup error for an agent process.
    pub fn open(root: impl Into<PathBuf>, audit: Box<dyn AuditSink>) -> Result<Self> {
        let root = root.into();
        for dir in [
            CURRENT_TASKS_DIR,
            COMPLETED_TASKS_DIR,
            SEARCH_RESULTS_DIR,
            AGENT_SIGNALS_DIR,
        ] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root, audit })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(CURRENT_TASKS_DIR).join(task_id)
    }

    fn archived_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(COMPLETED_TASKS_DIR).join(task_id)
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join(RECORD_FILE)
    }

    /// Task subtree path relative to the workspace root, for audit staging.
    fn rel_task_path(&self, task_id: &str) -> PathBuf {
        Path::new(CURRENT_TASKS_DIR).join(task_id)
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a task. Fails with `AlreadyExists` if the directory exists.
    /// A record with unsatisfied dependencies must be created `blocked`.
    pub fn create(&self, record: &TaskRecord) -> Result<()> {
        let dir = self.task_dir(&record.task_id);
        if dir.exists() {
            return Err(SwarmError::AlreadyExists(record.task_id.clone()));
        }
        self.validate_new(record)?;
        fs::create_dir_all(&dir)?;
        self.write_record(record)?;
        self.append_log(
            &record.task_id,
            "Task Created",
            &[
                ("Task", record.title.clone()),
                ("Type", record.agent_type.to_string()),
                ("Status", record.status.to_string()),
            ],
        )?;
        self.audit.record(
            "create",
            &format!("{}: {}", record.task_id, record.title),
            &[&self.rel_task_path(&record.task_id)],
        );
        debug!(task_id = %record.task_id, "task created");
        Ok(())
    }

    /// Read the current record for a task in `current_tasks/`.
    pub fn read(&self, task_id: &str) -> Result<TaskRecord> {
        self.read_at(&self.record_path(task_id), task_id)
    }

    /// Read a record from either the active or the archived collection.
    /// Used for dependency checks after a dependency has been archived.
    pub fn read_anywhere(&self, task_id: &str) -> Result<TaskRecord> {
        let current = self.record_path(task_id);
        if current.exists() {
            return self.read_at(&current, task_id);
        }
        self.read_at(&self.archived_dir(task_id).join(RECORD_FILE), task_id)
    }

    fn read_at(&self, path: &Path, task_id: &str) -> Result<TaskRecord> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SwarmError::NotFound(task_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|source| SwarmError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read-modify-write. Not atomic: between the read and the write another
    /// process may update the same record, and the last writer wins. The
    /// mutated record is validated against the snapshot (legal transition,
    /// monotone progress and retry count, immutable id) before the rewrite.
    pub fn update<F>(&self, task_id: &str, log_event: &str, mutate: F) -> Result<TaskRecord>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let old = self.read(task_id)?;
        let mut record = old.clone();
        mutate(&mut record);
        validate_update(&old, &record)?;
        record.updated_at = Utc::now();
        self.write_record(&record)?;

        let mut fields = vec![
            ("Status", record.status.to_string()),
            ("Progress", format!("{:.0}%", record.progress * 100.0)),
        ];
        if let Some(agent) = &record.claimed_by {
            fields.push(("Agent", agent.clone()));
        }
        self.append_log(task_id, log_event, &fields)?;
        self.audit.record(
            "update",
            &format!("{}: {} -> {}", task_id, log_event, record.status),
            &[&self.rel_task_path(task_id)],
        );
        Ok(record)
    }

    /// Enumerate tasks in `current_tasks/` matching the predicate.
    /// Malformed records are skipped with a warning, never fatal to the scan.
    pub fn list<F>(&self, filter: F) -> Result<Vec<TaskRecord>>
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let mut tasks = Vec::new();
        let dir = self.root.join(CURRENT_TASKS_DIR);
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let task_id = entry.file_name().to_string_lossy().to_string();
            match self.read(&task_id) {
                Ok(record) => {
                    if filter(&record) {
                        tasks.push(record);
                    }
                }
                Err(SwarmError::NotFound(_)) => {} // directory without a record yet
                Err(e) => warn!(task_id, error = %e, "skipping unreadable task record"),
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    /// Like [`TaskStore::list`], but over the archived collection.
    pub fn list_archived<F>(&self, filter: F) -> Result<Vec<TaskRecord>>
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let mut tasks = Vec::new();
        let dir = self.root.join(COMPLETED_TASKS_DIR);
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let task_id = entry.file_name().to_string_lossy().to_string();
            let path = self.archived_dir(&task_id).join(RECORD_FILE);
            match self.read_at(&path, &task_id) {
                Ok(record) => {
                    if filter(&record) {
                        tasks.push(record);
                    }
                }
                Err(SwarmError::NotFound(_)) => {}
                Err(e) => warn!(task_id, error = %e, "skipping unreadable archived record"),
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    /// Remove a task subtree. Fails silently if already absent.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        let dir = self.task_dir(task_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                self.audit.record(
                    "delete",
                    task_id,
                    &[&self.rel_task_path(task_id)],
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a terminal task's subtree to `completed_tasks/`.
    pub fn archive(&self, task_id: &str) -> Result<()> {
        let record = self.read(task_id)?;
        if !record.status.is_terminal() {
            return Err(SwarmError::Validation {
                task_id: task_id.to_string(),
                reason: format!("cannot archive non-terminal task ({})", record.status),
            });
        }
        let dest = self.archived_dir(task_id);
        fs::rename(self.task_dir(task_id), &dest)?;
        self.audit.record(
            "archive",
            task_id,
            &[
                &self.rel_task_path(task_id),
                &Path::new(COMPLETED_TASKS_DIR).join(task_id),
            ],
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status helpers
    // ------------------------------------------------------------------

    /// Claimant marks its task running, immediately before domain work.
    pub fn mark_in_progress(&self, task_id: &str, agent_id: &str) -> Result<TaskRecord> {
        let record = self.read(task_id)?;
        if record.claimed_by.as_deref() != Some(agent_id) {
            return Err(SwarmError::Validation {
                task_id: task_id.to_string(),
                reason: format!(
                    "only the claimant may start work (held by {:?})",
                    record.claimed_by
                ),
            });
        }
        self.update(task_id, "Execution Started", |t| {
            t.status = TaskStatus::InProgress;
        })
    }

    /// Claimant reports success. Triggers dependency re-evaluation for
    /// blocked tasks on the next scan, not eagerly.
    pub fn complete(
        &self,
        task_id: &str,
        agent_id: &str,
        result: Map<String, Value>,
    ) -> Result<TaskRecord> {
        let updated = self.update(task_id, "Task Completed", |t| {
            t.status = TaskStatus::Completed;
            t.progress = 1.0;
            t.completed_at = Some(Utc::now());
            t.result = Some(result);
            t.metadata
                .insert("completed_by".into(), Value::String(agent_id.into()));
        })?;
        self.remove_claim_marker(task_id);
        Ok(updated)
    }

    /// Claimant reports failure. Increments `retry_count`; the record stays
    /// `failed` and recovery spawns a sibling rather than reviving it.
    pub fn fail(
        &self,
        task_id: &str,
        agent_id: &str,
        error: &str,
        result: Map<String, Value>,
    ) -> Result<TaskRecord> {
        let updated = self.update(task_id, "Task Failed", |t| {
            t.status = TaskStatus::Failed;
            t.failed_at = Some(Utc::now());
            t.retry_count += 1;
            let mut map = result;
            map.insert("error".into(), Value::String(error.into()));
            t.result = Some(map);
            t.metadata
                .insert("failed_by".into(), Value::String(agent_id.into()));
        })?;
        self.remove_claim_marker(task_id);
        Ok(updated)
    }

    /// Claimant reports a failure below the stuck threshold: the retry is
    /// recorded but the task goes back to `available` for another attempt
    /// (the `in_progress -> available` edge, with the claim cleared).
    pub fn fail_and_requeue(
        &self,
        task_id: &str,
        agent_id: &str,
        error: &str,
        result: Map<String, Value>,
    ) -> Result<TaskRecord> {
        let updated = self.update(task_id, "Task Failed (requeued)", |t| {
            t.status = TaskStatus::Available;
            t.claimed_by = None;
            t.claimed_at = None;
            t.failed_at = Some(Utc::now());
            t.retry_count += 1;
            let mut map = result;
            map.insert("error".into(), Value::String(error.into()));
            t.result = Some(map);
            t.metadata
                .insert("failed_by".into(), Value::String(agent_id.into()));
        })?;
        self.remove_claim_marker(task_id);
        Ok(updated)
    }

    pub fn cancel(&self, task_id: &str) -> Result<TaskRecord> {
        let updated = self.update(task_id, "Task Cancelled", |t| {
            t.status = TaskStatus::Cancelled;
        })?;
        self.remove_claim_marker(task_id);
        Ok(updated)
    }

    /// Externally-forced release: the only backward transition. Clears the
    /// claim so the task is claimable again.
    pub fn force_release(&self, task_id: &str) -> Result<TaskRecord> {
        let updated = self.update(task_id, "Claim Released", |t| {
            t.status = TaskStatus::Available;
            t.claimed_by = None;
            t.claimed_at = None;
        })?;
        self.remove_claim_marker(task_id);
        Ok(updated)
    }

    pub(crate) fn remove_claim_marker(&self, task_id: &str) {
        let marker = self.task_dir(task_id).join(CLAIM_MARKER_FILE);
        if let Err(e) = fs::remove_file(&marker) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id, error = %e, "could not remove claim marker");
            }
        }
    }

    // ------------------------------------------------------------------
    // Dependency gating and rollup
    // ------------------------------------------------------------------

    /// Whether a dependency counts as satisfied: completed in place, or
    /// archived after completion.
    pub fn dependency_satisfied(&self, dep_id: &str) -> bool {
        match self.read_anywhere(dep_id) {
            Ok(dep) => dep.status == TaskStatus::Completed,
            Err(_) => false,
        }
    }

    /// Evaluate `not_started`/`blocked` tasks and promote those whose
    /// dependencies are all completed. Called lazily from poll loops;
    /// propagation latency equals the poll interval.
    pub fn promote_unblocked(&self) -> Result<Vec<String>> {
        let gated = self.list(|t| {
            matches!(t.status, TaskStatus::NotStarted | TaskStatus::Blocked)
        })?;
        let mut promoted = Vec::new();
        for task in gated {
            let ready = task
                .dependencies
                .iter()
                .all(|dep| self.dependency_satisfied(dep));
            if ready {
                match self.update(&task.task_id, "Dependencies Satisfied", |t| {
                    t.status = TaskStatus::Available;
                }) {
                    Ok(_) => promoted.push(task.task_id),
                    Err(e) => warn!(task_id = %task.task_id, error = %e, "promotion failed"),
                }
            }
        }
        Ok(promoted)
    }

    /// Explicit parent-completion rollup: a decomposed parent completes once
    /// every child has completed. Evaluated during scans like promotion.
    pub fn rollup_decomposed(&self) -> Result<Vec<String>> {
        let parents = self.list(|t| {
            t.status == TaskStatus::InProgress && t.meta_flag("decomposed")
        })?;
        let mut completed = Vec::new();
        for parent in parents {
            let children: Vec<String> = parent
                .metadata
                .get("children")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if children.is_empty() {
                continue;
            }
            if children.iter().all(|c| self.dependency_satisfied(c)) {
                let count = children.len();
                match self.update(&parent.task_id, "Children Completed", |t| {
                    t.status = TaskStatus::Completed;
                    t.progress = 1.0;
                    t.completed_at = Some(Utc::now());
                    let mut result = Map::new();
                    result.insert("success".into(), Value::Bool(true));
                    result.insert("rollup".into(), Value::Bool(true));
                    result.insert("children_completed".into(), Value::from(count));
                    t.result = Some(result);
                }) {
                    Ok(_) => completed.push(parent.task_id),
                    Err(e) => warn!(task_id = %parent.task_id, error = %e, "rollup failed"),
                }
            }
        }
        Ok(completed)
    }

    // ------------------------------------------------------------------
    // Progress log and artifacts
    // ------------------------------------------------------------------

    /// Append one timestamped block to the task's progress log. The log is
    /// write-only audit material; nothing parses it beyond tail display.
    pub fn append_log(
        &self,
        task_id: &str,
        event: &str,
        fields: &[(&str, String)],
    ) -> Result<()> {
        use std::io::Write;
        let path = self.task_dir(task_id).join(LOG_FILE);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "=== {}: {} ===", event, Utc::now().to_rfc3339())?;
        for (key, value) in fields {
            writeln!(file, "{}: {}", key, value)?;
        }
        writeln!(file)?;
        Ok(())
    }

    /// Last `lines` lines of the progress log, for human display.
    pub fn tail_log(&self, task_id: &str, lines: usize) -> Result<String> {
        let path = self.task_dir(task_id).join(LOG_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SwarmError::NotFound(task_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let all: Vec<&str> = raw.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }

    /// Persist an execution artifact (e.g. terminal results) next to the
    /// task record.
    pub fn write_artifact(&self, task_id: &str, name: &str, value: &Value) -> Result<()> {
        let dir = self.task_dir(task_id);
        if !dir.exists() {
            return Err(SwarmError::NotFound(task_id.to_string()));
        }
        fs::write(dir.join(name), serde_json::to_string_pretty(value)?.as_bytes())
            .map_err(SwarmError::from)?;
        self.audit.record(
            "artifact",
            &format!("{}: {}", task_id, name),
            &[&self.rel_task_path(task_id)],
        );
        Ok(())
    }

    /// Persist a research artifact in the shared `search_results/` area,
    /// named by the producing task.
    pub fn write_search_result(&self, task_id: &str, name: &str, value: &Value) -> Result<()> {
        let path = self
            .root
            .join(SEARCH_RESULTS_DIR)
            .join(format!("{}--{}", task_id, name));
        fs::write(&path, serde_json::to_string_pretty(value)?.as_bytes())?;
        self.audit.record(
            "artifact",
            &format!("{}: search result {}", task_id, name),
            &[Path::new(SEARCH_RESULTS_DIR)],
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Agent signals
    // ------------------------------------------------------------------

    /// Drop an interrupt notice for another agent. Best-effort delivery:
    /// consumed whenever the recipient next polls.
    pub fn send_signal(&self, recipient: &str, task_id: &str, reason: &str) -> Result<()> {
        let signal = Signal {
            recipient: recipient.to_string(),
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        let name = format!("{}--{}.json", recipient, task_id);
        let path = self.root.join(AGENT_SIGNALS_DIR).join(name);
        fs::write(&path, serde_json::to_string_pretty(&signal)?.as_bytes())?;
        Ok(())
    }

    /// Consume all signals addressed to `recipient`, removing them.
    /// Unreadable signal files are skipped with a warning and removed.
    pub fn take_signals(&self, recipient: &str) -> Vec<Signal> {
        let prefix = format!("{}--", recipient);
        let dir = self.root.join(AGENT_SIGNALS_DIR);
        let mut signals = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return signals,
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(&prefix) {
                continue;
            }
            match fs::read_to_string(entry.path())
                .map_err(SwarmError::from)
                .and_then(|raw| {
                    serde_json::from_str::<Signal>(&raw).map_err(|source| SwarmError::Parse {
                        path: entry.path(),
                        source,
                    })
                }) {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!(file = %name, error = %e, "dropping unreadable signal"),
            }
            let _ = fs::remove_file(entry.path());
        }
        signals
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn write_record(&self, record: &TaskRecord) -> Result<()> {
        let path = self.record_path(&record.task_id);
        fs::write(path, serde_json::to_string_pretty(record)?.as_bytes())?;
        Ok(())
    }

    fn validate_new(&self, record: &TaskRecord) -> Result<()> {
        if record.claimed_by.is_some() {
            return Err(SwarmError::Validation {
                task_id: record.task_id.clone(),
                reason: "new tasks may not be pre-claimed".into(),
            });
        }
        let gated = record
            .dependencies
            .iter()
            .any(|dep| !self.dependency_satisfied(dep));
        if gated && record.status != TaskStatus::Blocked {
            return Err(SwarmError::Validation {
                task_id: record.task_id.clone(),
                reason: format!(
                    "task with unsatisfied dependencies must be created blocked, not {}",
                    record.status
                ),
            });
        }
        if !matches!(
            record.status,
            TaskStatus::NotStarted | TaskStatus::Available | TaskStatus::Blocked
        ) {
            return Err(SwarmError::Validation {
                task_id: record.task_id.clone(),
                reason: format!("invalid initial status: {}", record.status),
            });
        }
        Ok(())
    }
}

fn validate_update(old: &TaskRecord, new: &TaskRecord) -> Result<()> {
    if new.task_id != old.task_id {
        return Err(SwarmError::Validation {
            task_id: old.task_id.clone(),
            reason: "task_id is immutable".into(),
        });
    }
    if !old.status.can_transition_to(new.status) {
        return Err(SwarmError::InvalidTransition {
            task_id: old.task_id.clone(),
            from: old.status,
            to: new.status,
        });
    }
    if !(0.0..=1.0).contains(&new.progress) {
        return Err(SwarmError::Validation {
            task_id: old.task_id.clone(),
            reason: format!("progress out of range: {}", new.progress),
        });
    }
    if old.status == TaskStatus::InProgress
        && new.status == TaskStatus::InProgress
        && new.progress < old.progress
    {
        return Err(SwarmError::Validation {
            task_id: old.task_id.clone(),
            reason: format!(
                "progress may not decrease while in_progress ({} -> {})",
                old.progress, new.progress
            ),
        });
    }
    if new.retry_count < old.retry_count {
        return Err(SwarmError::Validation {
            task_id: old.task_id.clone(),
            reason: "retry_count may not decrease".into(),
        });
    }
    Ok(())
}

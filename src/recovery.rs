//! Stuck-task recovery.
//!
//! A failed task whose retry count has reached the stuck threshold gets a
//! sibling task carrying an alternative approach. The original record is
//! never touched: it stays `failed` as a permanent account of what was
//! tried. Pattern matching over the failure context is keyword-based and
//! deterministic, like the classifier.

use crate::error::SwarmError;
use crate::store::TaskStore;
use crate::types::{TaskRecord, TaskStatus};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePattern {
    ChronicFailure,
    TimeoutIssues,
    ResourceUnavailable,
    ExecutionError,
}

impl FailurePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePattern::ChronicFailure => "chronic_failure",
            FailurePattern::TimeoutIssues => "timeout_issues",
            FailurePattern::ResourceUnavailable => "resource_unavailable",
            FailurePattern::ExecutionError => "execution_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    DifferentMethod,
    SimplifyOrParallelize,
    AlternativeSources,
    ToolSubstitution,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::DifferentMethod => "different_method",
            Recommendation::SimplifyOrParallelize => "simplify_or_parallelize",
            Recommendation::AlternativeSources => "alternative_sources",
            Recommendation::ToolSubstitution => "tool_substitution",
        }
    }
}

/// The approach template written into the sibling's metadata.
#[derive(Debug, Clone)]
pub struct AlternativeApproach {
    pub pattern: FailurePattern,
    pub recommendation: Recommendation,
    /// Short tag naming what changed versus the original attempt.
    pub changes: &'static str,
}

impl AlternativeApproach {
    fn for_pattern(pattern: FailurePattern) -> Self {
        match pattern {
            FailurePattern::ChronicFailure => Self {
                pattern,
                recommendation: Recommendation::DifferentMethod,
                changes: "method_change",
            },
            FailurePattern::TimeoutIssues => Self {
                pattern,
                recommendation: Recommendation::SimplifyOrParallelize,
                changes: "simplification",
            },
            FailurePattern::ResourceUnavailable => Self {
                pattern,
                recommendation: Recommendation::AlternativeSources,
                changes: "source_substitution",
            },
            FailurePattern::ExecutionError => Self {
                pattern,
                recommendation: Recommendation::ToolSubstitution,
                changes: "tool_substitution",
            },
        }
    }
}

/// Classifies failures and spawns recovery siblings. The per-task attempt
/// history lives in memory only; chronic escalation therefore resets when
/// the recovery process restarts, which is acceptable; the sibling-dedup
/// check against the store is what prevents duplicate recovery tasks.
pub struct RecoveryEngine {
    history: HashMap<String, Vec<FailurePattern>>,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
        }
    }

    /// Classify a stuck task's failure from the error text recorded on it.
    /// Three or more recorded attempts for the same task escalate to
    /// chronic regardless of the error text.
    pub fn classify(&self, task: &TaskRecord) -> FailurePattern {
        let attempts = self.history.get(&task.task_id).map_or(0, Vec::len);
        if attempts >= 3 {
            return FailurePattern::ChronicFailure;
        }
        let context = failure_context(task).to_lowercase();
        if context.contains("timeout") || context.contains("timed out") {
            FailurePattern::TimeoutIssues
        } else if context.contains("not found")
            || context.contains("unavailable")
            || context.contains("no such")
        {
            FailurePattern::ResourceUnavailable
        } else {
            FailurePattern::ExecutionError
        }
    }

    /// Number of the next recovery sibling for `original`, scanning the
    /// store so numbering survives process restarts.
    fn next_attempt_number(&self, store: &TaskStore, original: &TaskRecord) -> Result<u32, SwarmError> {
        Ok(recovery_siblings(store, original)?.len() as u32 + 1)
    }

    /// Whether this failure already has an answer in the store. An open
    /// sibling means recovery is in flight; a completed sibling means the
    /// alternative approach worked, and the failed original stands as a
    /// permanent record. Only when every prior sibling itself ended
    /// `failed` or `cancelled` does another attempt go out.
    pub fn already_recovered(&self, store: &TaskStore, original: &TaskRecord) -> Result<bool, SwarmError> {
        let siblings = recovery_siblings(store, original)?;
        Ok(siblings
            .iter()
            .any(|t| t.status == TaskStatus::Completed || !t.status.is_terminal()))
    }

    /// Spawn the recovery sibling for a stuck task. The original is read,
    /// never written; the sibling is immediately `available` and carries no
    /// dependency on the original.
    pub fn recover(
        &mut self,
        store: &TaskStore,
        original: &TaskRecord,
    ) -> Result<TaskRecord, SwarmError> {
        let pattern = self.classify(original);
        let approach = AlternativeApproach::for_pattern(pattern);
        let attempt = self.next_attempt_number(store, original)?;

        let sibling_id = format!("{}-alt-{:02}", original.task_id, attempt);
        let mut sibling = TaskRecord::new(
            &sibling_id,
            format!("{} (alternative approach)", original.title),
            format!(
                "{}\n\nPrevious attempt failed ({}); try {}: {}",
                original.description,
                pattern.as_str(),
                approach.recommendation.as_str(),
                approach.changes,
            ),
            original.agent_type.clone(),
        );
        sibling.status = TaskStatus::Available;
        sibling.priority = original.priority;
        sibling
            .metadata
            .insert("created_by_recovery".into(), Value::Bool(true));
        sibling.metadata.insert(
            "recovered_from".into(),
            Value::String(original.task_id.clone()),
        );
        sibling
            .metadata
            .insert("recovery_attempt".into(), Value::from(attempt));
        sibling.metadata.insert(
            "failure_pattern".into(),
            Value::String(pattern.as_str().into()),
        );
        sibling.metadata.insert(
            "recommendation".into(),
            Value::String(approach.recommendation.as_str().into()),
        );
        sibling.metadata.insert(
            "alternative_strategy".into(),
            Value::String(approach.changes.into()),
        );
        store.create(&sibling)?;

        self.history
            .entry(original.task_id.clone())
            .or_default()
            .push(pattern);
        info!(
            original = %original.task_id,
            sibling = %sibling_id,
            pattern = pattern.as_str(),
            "recovery sibling created"
        );
        Ok(sibling)
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// All recovery siblings spawned for `original`, including archived ones;
/// a completed sibling must keep counting after it moves to the archive.
fn recovery_siblings(
    store: &TaskStore,
    original: &TaskRecord,
) -> Result<Vec<TaskRecord>, SwarmError> {
    let is_sibling =
        |t: &TaskRecord| t.meta_str("recovered_from") == Some(original.task_id.as_str());
    let mut siblings = store.list(is_sibling)?;
    siblings.extend(store.list_archived(is_sibling)?);
    Ok(siblings)
}

/// Error text recorded on the failed task, falling back to the description.
fn failure_context(task: &TaskRecord) -> String {
    task.result
        .as_ref()
        .and_then(|r| r.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| task.description.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentType;
    use serde_json::Map;

    fn failed_task(error: &str) -> TaskRecord {
        let mut task = TaskRecord::new("t1", "t", "d", AgentType::Terminal);
        task.status = TaskStatus::Failed;
        task.retry_count = 2;
        let mut result = Map::new();
        result.insert("error".into(), Value::String(error.into()));
        task.result = Some(result);
        task
    }

    #[test]
    fn timeout_text_maps_to_simplification() {
        let engine = RecoveryEngine::new();
        let task = failed_task("command timed out after 30s");
        assert_eq!(engine.classify(&task), FailurePattern::TimeoutIssues);
        let approach = AlternativeApproach::for_pattern(FailurePattern::TimeoutIssues);
        assert_eq!(approach.recommendation, Recommendation::SimplifyOrParallelize);
        assert_eq!(approach.changes, "simplification");
    }

    #[test]
    fn missing_resource_maps_to_source_substitution() {
        let engine = RecoveryEngine::new();
        let task = failed_task("data file not found");
        assert_eq!(engine.classify(&task), FailurePattern::ResourceUnavailable);
    }

    #[test]
    fn unknown_errors_map_to_tool_substitution() {
        let engine = RecoveryEngine::new();
        let task = failed_task("segfault in parser");
        assert_eq!(engine.classify(&task), FailurePattern::ExecutionError);
        let approach = AlternativeApproach::for_pattern(FailurePattern::ExecutionError);
        assert_eq!(approach.changes, "tool_substitution");
    }

    #[test]
    fn repeated_attempts_escalate_to_chronic() {
        let mut engine = RecoveryEngine::new();
        let task = failed_task("whatever");
        for _ in 0..3 {
            engine
                .history
                .entry(task.task_id.clone())
                .or_default()
                .push(FailurePattern::ExecutionError);
        }
        assert_eq!(engine.classify(&task), FailurePattern::ChronicFailure);
    }
}

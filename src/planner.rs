//! Planning-step expansion.
//!
//! Planning tasks (the `needs_planning` steps emitted by decomposition)
//! are executed here: the planner classifies the step by keyword, emits a
//! short chain of concrete detail tasks with explicit commands where the
//! plan kind warrants them, and completes the planning task with the plan
//! as its result payload. Same determinism contract as the classifier.

use crate::error::SwarmError;
use crate::store::TaskStore;
use crate::types::{AgentType, StepDescriptor, TaskRecord, TaskStatus};
use serde_json::Value;

/// What kind of plan a planning task calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    CodebaseAnalysis,
    StrategicPlanning,
    ResearchPlanning,
    GeneralPlanning,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::CodebaseAnalysis => "codebase_analysis",
            PlanKind::StrategicPlanning => "strategic_planning",
            PlanKind::ResearchPlanning => "research_planning",
            PlanKind::GeneralPlanning => "general_planning",
        }
    }
}

/// Pick the plan kind from the planning task's text.
pub fn classify_plan(task: &TaskRecord) -> PlanKind {
    let text = format!("{} {}", task.title, task.description).to_lowercase();
    if text.contains("codebase") || text.contains("code") || text.contains("repository") {
        PlanKind::CodebaseAnalysis
    } else if text.contains("strategy") || text.contains("structure")
        || text.contains("deliverable")
    {
        PlanKind::StrategicPlanning
    } else if text.contains("research") || text.contains("sources") || text.contains("topic") {
        PlanKind::ResearchPlanning
    } else {
        PlanKind::GeneralPlanning
    }
}

/// Detail steps for a plan kind. Commands are read-only inspections; the
/// terminal agent's safety screen would reject anything destructive anyway.
pub fn expand(kind: PlanKind) -> Vec<StepDescriptor> {
    match kind {
        PlanKind::CodebaseAnalysis => vec![
            StepDescriptor::new(
                "Survey the repository layout and entry points",
                AgentType::Terminal,
                false,
                5,
            )
            .with_commands(vec![
                "find . -maxdepth 2 -type d | head -30".to_string(),
                "ls -la".to_string(),
            ]),
            StepDescriptor::new(
                "Inspect recent change history for active areas",
                AgentType::Terminal,
                false,
                4,
            )
            .with_commands(vec!["git log --oneline -20".to_string()]),
            StepDescriptor::new(
                "Write up the codebase findings",
                AgentType::FileOperations,
                false,
                4,
            ),
        ],
        PlanKind::StrategicPlanning => vec![
            StepDescriptor::new(
                "Draft an outline of the deliverable with sections and owners",
                AgentType::FileOperations,
                false,
                5,
            ),
            StepDescriptor::new(
                "Review the outline against the original task description",
                AgentType::FileOperations,
                false,
                3,
            ),
        ],
        PlanKind::ResearchPlanning => vec![
            StepDescriptor::new(
                "Enumerate candidate sources and search terms",
                AgentType::Search,
                false,
                4,
            ),
            StepDescriptor::new(
                "Record the research plan with priorities per source",
                AgentType::FileOperations,
                false,
                3,
            ),
        ],
        PlanKind::GeneralPlanning => vec![
            StepDescriptor::new(
                "Check the working environment before execution",
                AgentType::Terminal,
                false,
                3,
            )
            .with_commands(vec!["pwd".to_string(), "ls -la".to_string()]),
            StepDescriptor::new(
                "Record the execution plan",
                AgentType::FileOperations,
                false,
                3,
            ),
        ],
    }
}

/// Materialize detail tasks for a completed plan: `{planning}-detail-NN`,
/// chained like decomposition steps. Returns per-child outcomes.
pub fn materialize_details(
    store: &TaskStore,
    planning_task: &TaskRecord,
    kind: PlanKind,
    steps: &[StepDescriptor],
) -> Vec<Result<String, SwarmError>> {
    let mut outcomes = Vec::with_capacity(steps.len());
    let mut prev_id: Option<String> = None;
    for (index, step) in steps.iter().enumerate() {
        let child_id = format!("{}-detail-{:02}", planning_task.task_id, index + 1);
        let mut child = TaskRecord::new(
            &child_id,
            format!("Detail {}: {}", index + 1, step.description),
            &step.description,
            step.agent_type.clone(),
        );
        child.priority = planning_task.priority;
        match &prev_id {
            None => child.status = TaskStatus::Available,
            Some(dep) => {
                child.status = TaskStatus::Blocked;
                child.dependencies.push(dep.clone());
            }
        }
        child
            .metadata
            .insert("created_by_planning".into(), Value::Bool(true));
        child.metadata.insert(
            "parent_task".into(),
            Value::String(planning_task.task_id.clone()),
        );
        child
            .metadata
            .insert("plan_kind".into(), Value::String(kind.as_str().into()));
        child.metadata.insert(
            "estimated_minutes".into(),
            Value::from(step.estimated_minutes),
        );
        if let Some(commands) = &step.specific_commands {
            child
                .metadata
                .insert("specific_commands".into(), Value::from(commands.clone()));
        }
        outcomes.push(store.create(&child).map(|()| {
            prev_id = Some(child_id.clone());
            child_id
        }));
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planning_task(title: &str, description: &str) -> TaskRecord {
        TaskRecord::new("p1-step-01", title, description, AgentType::Planning)
    }

    #[test]
    fn codebase_keywords_pick_codebase_analysis() {
        let t = planning_task("Plan the analysis", "survey the repository first");
        assert_eq!(classify_plan(&t), PlanKind::CodebaseAnalysis);
    }

    #[test]
    fn unmatched_text_falls_back_to_general() {
        let t = planning_task("Plan the approach", "figure out what to do");
        assert_eq!(classify_plan(&t), PlanKind::GeneralPlanning);
    }

    #[test]
    fn codebase_plan_carries_readonly_commands() {
        let steps = expand(PlanKind::CodebaseAnalysis);
        assert_eq!(steps.len(), 3);
        let commands = steps[0].specific_commands.as_ref().unwrap();
        assert!(commands.iter().any(|c| c.starts_with("find")));
        assert!(steps[2].specific_commands.is_none());
    }

    #[test]
    fn expansion_is_deterministic() {
        assert_eq!(expand(PlanKind::ResearchPlanning), expand(PlanKind::ResearchPlanning));
    }
}

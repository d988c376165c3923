//! Keyword-driven task classification and decomposition planning.
//!
//! Deliberately deterministic: the same title and description always
//! produce the same verdict and the same step plan. No model calls, no
//! randomness. The heuristics are crude on purpose: a task that slips
//! through as atomic still executes, just without decomposition.

use crate::types::{AgentType, StepDescriptor, TaskRecord};
use regex_lite::Regex;
use std::sync::LazyLock;

/// Phrases whose presence marks a task as complex.
const COMPLEXITY_INDICATORS: &[&str] = &[
    " and ",
    "compare",
    "analyze",
    "research and",
    "find and",
    "create comprehensive",
    "full analysis",
    "step by step",
];

/// Action verbs counted for the multiple-verb complexity test.
const ACTION_VERBS: &[&str] = &[
    "analyze", "research", "create", "find", "compare", "evaluate", "build",
    "write", "summarize", "investigate", "collect", "report",
];

static WORD_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z_]+").unwrap());

/// Complexity verdict: any indicator phrase present, or more than one
/// distinct action verb in the combined text.
pub fn is_complex(title: &str, description: &str) -> bool {
    let text = format!("{} {}", title, description).to_lowercase();
    if COMPLEXITY_INDICATORS.iter().any(|ind| text.contains(ind)) {
        return true;
    }
    let mut verbs_seen = 0usize;
    for verb in ACTION_VERBS {
        if WORD_SPLIT.find_iter(&text).any(|m| m.as_str() == *verb) {
            verbs_seen += 1;
            if verbs_seen > 1 {
                return true;
            }
        }
    }
    false
}

/// Decomposition strategy, chosen by the dominant keyword family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Analysis,
    Research,
    Creation,
    General,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Analysis => "analysis",
            Strategy::Research => "research",
            Strategy::Creation => "creation",
            Strategy::General => "general",
        }
    }
}

/// Outcome of classifying a task.
#[derive(Debug, Clone)]
pub enum Classification {
    /// Simple enough to execute directly; re-typed for the named capability.
    Atomic { agent_type: AgentType },
    /// Needs decomposition into the given step plan.
    Decompose {
        strategy: Strategy,
        steps: Vec<StepDescriptor>,
    },
}

/// Classify a task: atomic with an inferred agent type, or a deterministic
/// step plan under one of the four strategies.
pub fn classify(task: &TaskRecord) -> Classification {
    if !is_complex(&task.title, &task.description) {
        return Classification::Atomic {
            agent_type: infer_agent_type(&task.title, &task.description),
        };
    }
    let strategy = pick_strategy(&task.title, &task.description);
    Classification::Decompose {
        strategy,
        steps: plan_steps(strategy),
    }
}

fn pick_strategy(title: &str, description: &str) -> Strategy {
    let text = format!("{} {}", title, description).to_lowercase();
    if text.contains("analyze") || text.contains("analysis") || text.contains("compare") {
        Strategy::Analysis
    } else if text.contains("research") || text.contains("find") || text.contains("search") {
        Strategy::Research
    } else if text.contains("create") || text.contains("write") || text.contains("build") {
        Strategy::Creation
    } else {
        Strategy::General
    }
}

/// Fixed step templates per strategy. Step order is execution order; the
/// materializer chains each step on its predecessor.
fn plan_steps(strategy: Strategy) -> Vec<StepDescriptor> {
    match strategy {
        Strategy::Analysis => vec![
            StepDescriptor::new(
                "Plan the analysis: identify targets, methods, and output format",
                AgentType::Planning,
                true,
                3,
            ),
            StepDescriptor::new(
                "Gather raw data from the environment for analysis",
                AgentType::Terminal,
                false,
                8,
            ),
            StepDescriptor::new(
                "Search for reference material and prior findings",
                AgentType::Search,
                false,
                6,
            ),
            StepDescriptor::new(
                "Consolidate findings into the analysis report",
                AgentType::FileOperations,
                false,
                4,
            ),
        ],
        Strategy::Research => vec![
            StepDescriptor::new(
                "Search for sources covering the research topic",
                AgentType::Search,
                false,
                5,
            ),
            StepDescriptor::new(
                "Compile the research findings into a summary document",
                AgentType::FileOperations,
                false,
                3,
            ),
        ],
        Strategy::Creation => vec![
            StepDescriptor::new(
                "Plan the structure and content of the deliverable",
                AgentType::Planning,
                true,
                4,
            ),
            StepDescriptor::new(
                "Produce the deliverable files",
                AgentType::FileOperations,
                false,
                6,
            ),
        ],
        Strategy::General => vec![
            StepDescriptor::new(
                "Plan the approach for this task",
                AgentType::Planning,
                true,
                4,
            ),
            StepDescriptor::new(
                "Carry out the planned work",
                AgentType::Terminal,
                false,
                8,
            ),
        ],
    }
}

/// Materialize a step plan as child task records chained by dependency:
/// step 1 is `available`, each later step is `blocked` on its predecessor.
/// Per-child creation failures are reported in the returned list rather
/// than rolling back the siblings already created.
pub fn materialize_steps(
    store: &crate::store::TaskStore,
    parent: &TaskRecord,
    strategy: Strategy,
    steps: &[StepDescriptor],
) -> Vec<Result<String, crate::error::SwarmError>> {
    use crate::types::TaskStatus;
    use serde_json::Value;

    let mut outcomes = Vec::with_capacity(steps.len());
    let mut prev_id: Option<String> = None;
    for (index, step) in steps.iter().enumerate() {
        let child_id = format!("{}-step-{:02}", parent.task_id, index + 1);
        let mut child = TaskRecord::new(
            &child_id,
            format!("Step {}: {}", index + 1, step.description),
            &step.description,
            step.agent_type.clone(),
        );
        child.priority = parent.priority;
        match &prev_id {
            None => child.status = TaskStatus::Available,
            Some(dep) => {
                child.status = TaskStatus::Blocked;
                child.dependencies.push(dep.clone());
            }
        }
        child
            .metadata
            .insert("created_by_breakdown".into(), Value::Bool(true));
        child
            .metadata
            .insert("parent_task".into(), Value::String(parent.task_id.clone()));
        child
            .metadata
            .insert("step_type".into(), Value::String(strategy.as_str().into()));
        child
            .metadata
            .insert("needs_planning".into(), Value::Bool(step.needs_planning));
        child.metadata.insert(
            "estimated_minutes".into(),
            Value::from(step.estimated_minutes),
        );
        if let Some(commands) = &step.specific_commands {
            child.metadata.insert(
                "specific_commands".into(),
                Value::from(commands.clone()),
            );
        }
        outcomes.push(store.create(&child).map(|()| {
            prev_id = Some(child_id.clone());
            child_id
        }));
    }
    outcomes
}

/// Best-effort capability inference for atomic tasks.
pub fn infer_agent_type(title: &str, description: &str) -> AgentType {
    let text = format!("{} {}", title, description).to_lowercase();
    if text.contains("search") || text.contains("look up") || text.contains("find") {
        AgentType::Search
    } else if text.contains("file") || text.contains("write") || text.contains("save") {
        AgentType::FileOperations
    } else if text.contains("run") || text.contains("command") || text.contains("execute") {
        AgentType::Terminal
    } else if text.contains("plan") {
        AgentType::Planning
    } else {
        AgentType::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskRecord;

    fn task(title: &str, description: &str) -> TaskRecord {
        TaskRecord::new("t1", title, description, AgentType::Auto)
    }

    #[test]
    fn indicator_phrases_mark_complex() {
        assert!(is_complex("Research and summarize results", ""));
        assert!(is_complex("Full analysis of logs", ""));
        assert!(is_complex("Compare two options", ""));
    }

    #[test]
    fn multiple_verbs_mark_complex() {
        assert!(is_complex("Investigate the outage", "then write a report"));
    }

    #[test]
    fn single_action_is_atomic() {
        assert!(!is_complex("List files", "show the top-level directory"));
        assert!(!is_complex("Run the backup script", ""));
    }

    #[test]
    fn classification_is_deterministic() {
        let t = task("Analyze disk usage and report", "full analysis of /var");
        for _ in 0..3 {
            match classify(&t) {
                Classification::Decompose { strategy, steps } => {
                    assert_eq!(strategy, Strategy::Analysis);
                    assert_eq!(steps.len(), 4);
                    assert_eq!(steps[0].agent_type, AgentType::Planning);
                    assert!(steps[0].needs_planning);
                    assert_eq!(steps[1].agent_type, AgentType::Terminal);
                    assert_eq!(steps[2].agent_type, AgentType::Search);
                    assert_eq!(steps[3].agent_type, AgentType::FileOperations);
                }
                Classification::Atomic { .. } => panic!("expected decomposition"),
            }
        }
    }

    #[test]
    fn codebase_analysis_request_yields_four_step_pipeline() {
        let t = task(
            "Check the codebase",
            "analyze codebase for syntax flaws and compare with fixes from Stack Overflow",
        );
        match classify(&t) {
            Classification::Decompose { strategy, steps } => {
                assert_eq!(strategy, Strategy::Analysis);
                let types: Vec<&AgentType> = steps.iter().map(|s| &s.agent_type).collect();
                assert_eq!(
                    types,
                    vec![
                        &AgentType::Planning,
                        &AgentType::Terminal,
                        &AgentType::Search,
                        &AgentType::FileOperations,
                    ]
                );
            }
            Classification::Atomic { .. } => panic!("expected decomposition"),
        }
    }

    #[test]
    fn research_strategy_has_two_steps() {
        let t = task("Research and compile rust async libraries", "");
        match classify(&t) {
            Classification::Decompose { strategy, steps } => {
                assert_eq!(strategy, Strategy::Research);
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[0].agent_type, AgentType::Search);
            }
            Classification::Atomic { .. } => panic!("expected decomposition"),
        }
    }

    #[test]
    fn atomic_inference_picks_capability() {
        let t = task("Run the linter", "execute the standard lint command");
        match classify(&t) {
            Classification::Atomic { agent_type } => {
                assert_eq!(agent_type, AgentType::Terminal)
            }
            Classification::Decompose { .. } => panic!("expected atomic"),
        }
    }
}

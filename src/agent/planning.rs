//! Planning agent: executes the planning steps produced by decomposition.
//!
//! Expands the planning task into concrete detail tasks (with explicit
//! commands where warranted) and completes it with the plan recorded in
//! its result, so downstream steps blocked on the planning step unblock
//! on the next scan.

use super::{AgentExecutor, Disposition};
use crate::planner;
use crate::store::TaskStore;
use crate::types::{ActionResult, AgentType, TaskRecord};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

pub struct PlanningExecutor;

#[async_trait]
impl AgentExecutor for PlanningExecutor {
    fn role(&self) -> &str {
        "planning"
    }

    fn capability(&self) -> AgentType {
        AgentType::Planning
    }

    async fn execute(&self, store: &TaskStore, task: &TaskRecord) -> (ActionResult, Disposition) {
        let kind = planner::classify_plan(task);
        let steps = planner::expand(kind);

        let outcomes = planner::materialize_details(store, task, kind, &steps);
        let mut details = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(id) => details.push(id),
                Err(e) => {
                    warn!(task_id = %task.task_id, error = %e, "detail creation failed")
                }
            }
        }
        if details.is_empty() {
            return (
                ActionResult::err("planning produced no detail tasks"),
                Disposition::Fail,
            );
        }

        info!(
            task_id = %task.task_id,
            plan_kind = kind.as_str(),
            details = details.len(),
            "plan expanded"
        );
        let planning_result = json!({
            "plan_kind": kind.as_str(),
            "detail_tasks": details,
            "steps": steps,
        });
        (
            ActionResult::ok(format!(
                "{} plan with {} detail task(s)",
                kind.as_str(),
                details.len()
            ))
            .with("planning_result", planning_result)
            .with("detail_tasks", Value::from(details)),
            Disposition::Complete,
        )
    }
}

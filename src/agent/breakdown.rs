//! Breakdown agent: decomposes complex tasks into executable steps.
//!
//! Claims `auto`-typed tasks that look complex, plans steps with the
//! classifier, and materializes them as chained children. The parent stays
//! `in_progress` and completes via rollup when every child has completed.
//! Atomic tasks get a concrete agent type assigned and are released for
//! the matching specialist to claim.

use super::{AgentExecutor, Disposition};
use crate::classifier::{self, Classification};
use crate::store::TaskStore;
use crate::types::{ActionResult, AgentType, TaskRecord, TaskStatus};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub struct BreakdownExecutor;

#[async_trait]
impl AgentExecutor for BreakdownExecutor {
    fn role(&self) -> &str {
        "breakdown"
    }

    fn capability(&self) -> AgentType {
        AgentType::Auto
    }

    /// Only untyped tasks are candidates; a task that already carries a
    /// concrete agent type belongs to that specialist. Children of an
    /// earlier decomposition are never re-decomposed.
    fn wants(&self, task: &TaskRecord) -> bool {
        task.status == TaskStatus::Available
            && task.agent_type == AgentType::Auto
            && !task.meta_flag("created_by_breakdown")
            && !task.meta_flag("created_by_planning")
            && !task.meta_flag("decomposed")
    }

    async fn execute(&self, store: &TaskStore, task: &TaskRecord) -> (ActionResult, Disposition) {
        match classifier::classify(task) {
            Classification::Atomic { agent_type } => {
                // Re-type and hand back; the matching specialist claims it.
                let retyped = store.update(&task.task_id, "Agent Type Assigned", |t| {
                    t.agent_type = agent_type.clone();
                });
                match retyped {
                    Ok(_) => {
                        info!(
                            task_id = %task.task_id,
                            agent_type = %agent_type,
                            "atomic task re-typed"
                        );
                        (
                            ActionResult::ok(format!("atomic, assigned to {}", agent_type)),
                            Disposition::Release,
                        )
                    }
                    Err(e) => (ActionResult::err(e.to_string()), Disposition::Fail),
                }
            }
            Classification::Decompose { strategy, steps } => {
                let outcomes = classifier::materialize_steps(store, task, strategy, &steps);
                let mut children = Vec::new();
                let mut failures = Vec::new();
                for outcome in outcomes {
                    match outcome {
                        Ok(id) => children.push(id),
                        Err(e) => failures.push(e.to_string()),
                    }
                }
                for failure in &failures {
                    warn!(task_id = %task.task_id, error = %failure, "child creation failed");
                }
                if children.is_empty() {
                    return (
                        ActionResult::err("decomposition produced no children"),
                        Disposition::Fail,
                    );
                }

                let child_values: Vec<Value> =
                    children.iter().cloned().map(Value::String).collect();
                let marked = store.update(&task.task_id, "Task Decomposed", |t| {
                    t.metadata.insert("decomposed".into(), Value::Bool(true));
                    t.metadata
                        .insert("children".into(), Value::Array(child_values.clone()));
                    t.metadata.insert(
                        "breakdown_strategy".into(),
                        Value::String(strategy.as_str().into()),
                    );
                });
                if let Err(e) = marked {
                    return (ActionResult::err(e.to_string()), Disposition::Fail);
                }
                info!(
                    task_id = %task.task_id,
                    strategy = strategy.as_str(),
                    children = children.len(),
                    "task decomposed"
                );
                (
                    ActionResult::ok(format!(
                        "decomposed into {} step(s) via {}",
                        children.len(),
                        strategy.as_str()
                    ))
                    .with("children", Value::Array(child_values)),
                    // Parent completes by rollup once the children finish.
                    Disposition::Pending,
                )
            }
        }
    }
}

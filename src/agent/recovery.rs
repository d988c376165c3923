//! Recovery agent: watches for stuck tasks and spawns alternative-approach
//! siblings.
//!
//! Deliberately an observer: it never claims or mutates the failed task.
//! The sibling-dedup check keeps recovery idempotent across restarts even
//! though the engine's attempt history is in-memory.

use super::{AgentExecutor, Disposition};
use crate::recovery::RecoveryEngine;
use crate::store::TaskStore;
use crate::types::{ActionResult, AgentType, TaskRecord, TaskStatus};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

pub struct RecoveryExecutor {
    engine: Mutex<RecoveryEngine>,
    stuck_threshold: u32,
}

impl RecoveryExecutor {
    pub fn new(stuck_threshold: u32) -> Self {
        Self {
            engine: Mutex::new(RecoveryEngine::new()),
            stuck_threshold,
        }
    }
}

#[async_trait]
impl AgentExecutor for RecoveryExecutor {
    fn role(&self) -> &str {
        "recovery"
    }

    fn capability(&self) -> AgentType {
        AgentType::Auto
    }

    fn wants(&self, task: &TaskRecord) -> bool {
        task.status == TaskStatus::Failed && task.is_stuck(self.stuck_threshold)
    }

    fn claims(&self) -> bool {
        false
    }

    async fn execute(&self, store: &TaskStore, task: &TaskRecord) -> (ActionResult, Disposition) {
        let mut engine = self.engine.lock().unwrap_or_else(|p| p.into_inner());
        match engine.already_recovered(store, task) {
            Ok(true) => {
                debug!(task_id = %task.task_id, "recovery sibling already open");
                return (
                    ActionResult::ok("recovery already in flight"),
                    Disposition::Pending,
                );
            }
            Ok(false) => {}
            Err(e) => return (ActionResult::err(e.to_string()), Disposition::Pending),
        }
        match engine.recover(store, task) {
            Ok(sibling) => (
                ActionResult::ok(format!("recovery sibling {} created", sibling.task_id))
                    .with("sibling", sibling.task_id.clone().into()),
                Disposition::Pending,
            ),
            Err(e) => (ActionResult::err(e.to_string()), Disposition::Pending),
        }
    }
}

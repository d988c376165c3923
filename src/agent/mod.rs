//! Agent executors and the shared poll loop.
//!
//! Every agent process is the same loop: consume signals, promote and roll
//! up tasks, scan for a candidate, claim it, execute, report. What differs
//! per role is the [`AgentExecutor`] plugged in. Coordination happens only
//! through the task store; agents never talk to each other directly.

pub mod breakdown;
pub mod handler;
pub mod planning;
pub mod recovery;
pub mod terminal;

use crate::config::SwarmConfig;
use crate::error::Result;
use crate::store::claim::ClaimStore;
use crate::store::TaskStore;
use crate::types::{ActionResult, AgentType, TaskRecord, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What the poll loop should do with the task after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Record the result and mark the task completed.
    Complete,
    /// Record the result and mark the task failed (increments retry count).
    Fail,
    /// Give the claim back; the task returns to `available`.
    Release,
    /// Leave the task as-is. Used when completion is deferred, e.g. a
    /// decomposed parent waiting for its children to roll up.
    Pending,
}

/// Role-specific behavior plugged into [`AgentLoop`].
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Role name, used in agent ids and log lines.
    fn role(&self) -> &str;

    /// Capability offered at claim time.
    fn capability(&self) -> AgentType;

    /// Candidate filter applied during the scan, before claiming.
    fn wants(&self, task: &TaskRecord) -> bool {
        task.status == TaskStatus::Available && task.capability_matches(&self.capability())
    }

    /// Whether this executor claims tasks before acting. Recovery watches
    /// failed tasks it must not mutate, so it opts out.
    fn claims(&self) -> bool {
        true
    }

    /// Perform the work. The task has been claimed and marked in-progress
    /// when [`claims`](AgentExecutor::claims) is true.
    async fn execute(&self, store: &TaskStore, task: &TaskRecord) -> (ActionResult, Disposition);
}

/// The shared poll loop: one agent process, one executor, one store.
pub struct AgentLoop {
    store: Arc<TaskStore>,
    claimer: Box<dyn ClaimStore>,
    executor: Box<dyn AgentExecutor>,
    agent_id: String,
    config: SwarmConfig,
    shutdown: watch::Receiver<bool>,
}

impl AgentLoop {
    pub fn new(
        store: Arc<TaskStore>,
        claimer: Box<dyn ClaimStore>,
        executor: Box<dyn AgentExecutor>,
        agent_id: String,
        config: SwarmConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            claimer,
            executor,
            agent_id,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown flag flips. Per-iteration errors are logged
    /// and the loop continues; only workspace loss would end it early.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            agent_id = %self.agent_id,
            role = self.executor.role(),
            "agent loop started"
        );
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            if let Err(e) = self.iteration().await {
                error!(agent_id = %self.agent_id, error = %e, "poll iteration failed");
            }
            let sleep = tokio::time::sleep(self.config.poll_interval());
            tokio::select! {
                _ = sleep => {}
                _ = self.shutdown.changed() => {}
            }
        }
        info!(agent_id = %self.agent_id, "agent loop stopped");
        Ok(())
    }

    /// One poll cycle. Claims and executes at most one task.
    pub async fn iteration(&mut self) -> Result<()> {
        self.consume_signals();

        if let Err(e) = self.store.promote_unblocked() {
            warn!(error = %e, "dependency promotion scan failed");
        }
        if let Err(e) = self.store.rollup_decomposed() {
            warn!(error = %e, "parent rollup scan failed");
        }

        let candidates = self.store.list(|t| self.executor.wants(t))?;
        for candidate in candidates {
            if !self.executor.claims() {
                // Observer-style executor: acts without holding the task.
                let (result, _) = self.executor.execute(&self.store, &candidate).await;
                if !result.success {
                    debug!(
                        task_id = %candidate.task_id,
                        error = ?result.error,
                        "observer action reported failure"
                    );
                }
                continue;
            }

            let claimed = match self.claimer.try_claim(
                &self.store,
                &candidate.task_id,
                &self.agent_id,
                &self.executor.capability(),
            ) {
                Ok(record) => record,
                Err(e) if e.is_claim_skip() => {
                    debug!(task_id = %candidate.task_id, reason = %e, "claim skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let running = self
                .store
                .mark_in_progress(&claimed.task_id, &self.agent_id)?;
            info!(
                agent_id = %self.agent_id,
                task_id = %running.task_id,
                title = %running.title,
                "executing task"
            );

            let (result, disposition) = self.executor.execute(&self.store, &running).await;
            self.report(&running, result, disposition)?;
            // One task per cycle keeps contention and log interleaving low.
            break;
        }
        Ok(())
    }

    fn report(
        &self,
        task: &TaskRecord,
        result: ActionResult,
        disposition: Disposition,
    ) -> Result<()> {
        match disposition {
            Disposition::Complete => {
                self.store
                    .complete(&task.task_id, &self.agent_id, result.into_map())?;
                info!(task_id = %task.task_id, "task completed");
            }
            Disposition::Fail => {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unspecified failure".to_string());
                // Below the stuck threshold the task goes back to the pool;
                // at the threshold it stays failed for recovery to find.
                let will_retry = task.retry_count + 1 < self.config.stuck_threshold;
                let updated = if will_retry {
                    self.store.fail_and_requeue(
                        &task.task_id,
                        &self.agent_id,
                        &error,
                        result.into_map(),
                    )?
                } else {
                    self.store
                        .fail(&task.task_id, &self.agent_id, &error, result.into_map())?
                };
                warn!(
                    task_id = %task.task_id,
                    retry_count = updated.retry_count,
                    requeued = will_retry,
                    error = %error,
                    "task failed"
                );
            }
            Disposition::Release => {
                self.claimer
                    .release(&self.store, &task.task_id, &self.agent_id)?;
                debug!(task_id = %task.task_id, "task released");
            }
            Disposition::Pending => {
                debug!(task_id = %task.task_id, "task left pending");
            }
        }
        Ok(())
    }

    /// Consume interrupt signals addressed to this agent: any held task
    /// named by a signal is force-released.
    fn consume_signals(&self) {
        for signal in self.store.take_signals(&self.agent_id) {
            info!(
                task_id = %signal.task_id,
                reason = %signal.reason,
                "interrupt signal received"
            );
            match self.store.read(&signal.task_id) {
                Ok(task) if task.claimed_by.as_deref() == Some(self.agent_id.as_str()) => {
                    if let Err(e) = self.store.force_release(&signal.task_id) {
                        warn!(task_id = %signal.task_id, error = %e, "forced release failed");
                    }
                }
                Ok(_) => debug!(task_id = %signal.task_id, "signal for task we do not hold"),
                Err(e) => debug!(task_id = %signal.task_id, error = %e, "signal for unknown task"),
            }
        }
    }
}

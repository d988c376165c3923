//! End-to-end agent scenarios driven through the poll loop.

use serde_json::{Map, Value};
use std::sync::Arc;
use task_swarm::agent::breakdown::BreakdownExecutor;
use task_swarm::agent::planning::PlanningExecutor;
use task_swarm::agent::recovery::RecoveryExecutor;
use task_swarm::agent::terminal::TerminalExecutor;
use task_swarm::agent::{AgentExecutor, AgentLoop};
use task_swarm::audit::NullAuditSink;
use task_swarm::config::SwarmConfig;
use task_swarm::store::claim::{ClaimStore, OptimisticClaimer};
use task_swarm::store::TaskStore;
use task_swarm::types::{AgentType, TaskRecord, TaskStatus};
use tempfile::TempDir;
use tokio::sync::watch;

fn open_store() -> (TempDir, Arc<TaskStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TaskStore::open(dir.path(), Box::new(NullAuditSink)).unwrap());
    (dir, store)
}

fn agent_loop(
    store: Arc<TaskStore>,
    executor: Box<dyn AgentExecutor>,
    agent_id: &str,
) -> AgentLoop {
    // Tests drive iteration() directly; the shutdown flag is never flipped.
    let (_tx, rx) = watch::channel(false);
    AgentLoop::new(
        store,
        Box::new(OptimisticClaimer),
        executor,
        agent_id.to_string(),
        SwarmConfig::default(),
        rx,
    )
}

fn complex_task(id: &str) -> TaskRecord {
    let mut task = TaskRecord::new(
        id,
        "Analyze the project and report findings",
        "full analysis of the working directory, step by step",
        AgentType::Auto,
    );
    task.status = TaskStatus::Available;
    task
}

fn complete_directly(store: &TaskStore, task_id: &str, agent_id: &str) {
    OptimisticClaimer
        .try_claim(store, task_id, agent_id, &AgentType::Auto)
        .unwrap();
    store.mark_in_progress(task_id, agent_id).unwrap();
    store.complete(task_id, agent_id, Map::new()).unwrap();
}

mod breakdown_tests {
    use super::*;

    #[tokio::test]
    async fn complex_task_decomposes_into_chained_steps() {
        let (_dir, store) = open_store();
        store.create(&complex_task("big")).unwrap();

        let mut agent = agent_loop(store.clone(), Box::new(BreakdownExecutor), "breakdown-1");
        agent.iteration().await.unwrap();

        // Parent holds its decomposition state and waits for rollup.
        let parent = store.read("big").unwrap();
        assert_eq!(parent.status, TaskStatus::InProgress);
        assert!(parent.meta_flag("decomposed"));
        let children: Vec<&str> = parent.metadata["children"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(
            children,
            vec!["big-step-01", "big-step-02", "big-step-03", "big-step-04"]
        );

        // Analysis strategy: planning, terminal, search, file_operations.
        let s1 = store.read("big-step-01").unwrap();
        assert_eq!(s1.status, TaskStatus::Available);
        assert_eq!(s1.agent_type, AgentType::Planning);
        assert!(s1.meta_flag("needs_planning"));
        assert!(s1.dependencies.is_empty());

        for (id, expected) in [
            ("big-step-02", AgentType::Terminal),
            ("big-step-03", AgentType::Search),
            ("big-step-04", AgentType::FileOperations),
        ] {
            let step = store.read(id).unwrap();
            assert_eq!(step.status, TaskStatus::Blocked);
            assert_eq!(step.agent_type, expected);
            assert!(step.meta_flag("created_by_breakdown"));
            assert_eq!(step.meta_str("parent_task"), Some("big"));
        }
        assert_eq!(
            store.read("big-step-03").unwrap().dependencies,
            vec!["big-step-02".to_string()]
        );
    }

    #[tokio::test]
    async fn atomic_task_is_retyped_and_released() {
        let (_dir, store) = open_store();
        let mut task = TaskRecord::new(
            "small",
            "Run the backup script",
            "execute the nightly backup command",
            AgentType::Auto,
        );
        task.status = TaskStatus::Available;
        store.create(&task).unwrap();

        let mut agent = agent_loop(store.clone(), Box::new(BreakdownExecutor), "breakdown-1");
        agent.iteration().await.unwrap();

        let retyped = store.read("small").unwrap();
        assert_eq!(retyped.status, TaskStatus::Available);
        assert_eq!(retyped.agent_type, AgentType::Terminal);
        assert!(retyped.claimed_by.is_none());
    }

    #[tokio::test]
    async fn breakdown_ignores_its_own_children() {
        let (_dir, store) = open_store();
        store.create(&complex_task("big")).unwrap();

        let mut agent = agent_loop(store.clone(), Box::new(BreakdownExecutor), "breakdown-1");
        agent.iteration().await.unwrap();
        // Second pass: the available child is complex-looking text but must
        // not be decomposed again.
        agent.iteration().await.unwrap();

        let s1 = store.read("big-step-01").unwrap();
        assert!(!s1.meta_flag("decomposed"));
        assert_eq!(s1.status, TaskStatus::Available);
    }
}

mod planning_tests {
    use super::*;

    #[tokio::test]
    async fn planning_step_expands_into_detail_tasks() {
        let (_dir, store) = open_store();
        store.create(&complex_task("big")).unwrap();

        let mut breakdown = agent_loop(store.clone(), Box::new(BreakdownExecutor), "breakdown-1");
        breakdown.iteration().await.unwrap();

        let mut planner = agent_loop(store.clone(), Box::new(PlanningExecutor), "planning-1");
        planner.iteration().await.unwrap();

        let plan_step = store.read("big-step-01").unwrap();
        assert_eq!(plan_step.status, TaskStatus::Completed);
        let result = plan_step.result.unwrap();
        assert!(result["planning_result"]["plan_kind"].is_string());

        let details = store.list(|t| t.meta_flag("created_by_planning")).unwrap();
        assert!(!details.is_empty());
        assert_eq!(details[0].status, TaskStatus::Available);
        for detail in &details[1..] {
            assert_eq!(detail.status, TaskStatus::Blocked);
        }

        // Completing the planning step unblocks the next decomposition step.
        store.promote_unblocked().unwrap();
        assert_eq!(
            store.read("big-step-02").unwrap().status,
            TaskStatus::Available
        );
    }
}

mod rollup_tests {
    use super::*;

    #[tokio::test]
    async fn parent_completes_when_all_children_complete() {
        let (_dir, store) = open_store();
        store.create(&complex_task("big")).unwrap();

        let mut agent = agent_loop(store.clone(), Box::new(BreakdownExecutor), "breakdown-1");
        agent.iteration().await.unwrap();

        let children: Vec<String> = store.read("big").unwrap().metadata["children"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        for child in &children {
            store.promote_unblocked().unwrap();
            complete_directly(&store, child, "worker-1");
        }

        assert_eq!(store.rollup_decomposed().unwrap(), vec!["big".to_string()]);
        let parent = store.read("big").unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
        let result = parent.result.unwrap();
        assert_eq!(result.get("rollup"), Some(&Value::Bool(true)));
        assert_eq!(
            result.get("children_completed"),
            Some(&Value::from(children.len()))
        );
    }

    #[tokio::test]
    async fn parent_waits_while_any_child_is_open() {
        let (_dir, store) = open_store();
        store.create(&complex_task("big")).unwrap();
        let mut agent = agent_loop(store.clone(), Box::new(BreakdownExecutor), "breakdown-1");
        agent.iteration().await.unwrap();

        complete_directly(&store, "big-step-01", "worker-1");
        assert!(store.rollup_decomposed().unwrap().is_empty());
        assert_eq!(store.read("big").unwrap().status, TaskStatus::InProgress);
    }
}

mod recovery_tests {
    use super::*;

    fn stuck_task(store: &TaskStore, id: &str, error: &str) {
        let mut task = TaskRecord::new(id, "flaky work", "do the thing", AgentType::Terminal);
        task.status = TaskStatus::Available;
        store.create(&task).unwrap();

        // First failure requeues, second reaches the stuck threshold.
        OptimisticClaimer
            .try_claim(store, id, "worker-1", &AgentType::Terminal)
            .unwrap();
        store.mark_in_progress(id, "worker-1").unwrap();
        store
            .fail_and_requeue(id, "worker-1", error, Map::new())
            .unwrap();

        OptimisticClaimer
            .try_claim(store, id, "worker-1", &AgentType::Terminal)
            .unwrap();
        store.mark_in_progress(id, "worker-1").unwrap();
        store.fail(id, "worker-1", error, Map::new()).unwrap();
    }

    #[tokio::test]
    async fn stuck_timeout_spawns_simplification_sibling() {
        let (_dir, store) = open_store();
        stuck_task(&store, "flaky", "command timed out after 30s");

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();

        let sibling = store.read("flaky-alt-01").unwrap();
        assert_eq!(sibling.status, TaskStatus::Available);
        assert!(sibling.dependencies.is_empty());
        assert!(sibling.meta_flag("created_by_recovery"));
        assert_eq!(sibling.meta_str("recovered_from"), Some("flaky"));
        assert_eq!(sibling.meta_str("failure_pattern"), Some("timeout_issues"));
        assert_eq!(
            sibling.meta_str("recommendation"),
            Some("simplify_or_parallelize")
        );
        assert_eq!(
            sibling.meta_str("alternative_strategy"),
            Some("simplification")
        );
    }

    #[tokio::test]
    async fn recovery_never_mutates_the_original() {
        let (_dir, store) = open_store();
        stuck_task(&store, "flaky", "resource unavailable");
        let before = store.read("flaky").unwrap();

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();

        let after = store.read("flaky").unwrap();
        assert_eq!(after.status, TaskStatus::Failed);
        assert_eq!(after.retry_count, before.retry_count);
        assert_eq!(after.updated_at, before.updated_at);
        assert!(after.claimed_by.is_none() || after.claimed_by == before.claimed_by);
    }

    #[tokio::test]
    async fn recovery_is_idempotent_while_sibling_is_open() {
        let (_dir, store) = open_store();
        stuck_task(&store, "flaky", "boom");

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();
        agent.iteration().await.unwrap();

        let siblings = store
            .list(|t| t.meta_str("recovered_from") == Some("flaky"))
            .unwrap();
        assert_eq!(siblings.len(), 1);
    }

    #[tokio::test]
    async fn completed_sibling_resolves_the_original() {
        let (_dir, store) = open_store();
        stuck_task(&store, "flaky", "boom");

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();
        complete_directly(&store, "flaky-alt-01", "worker-2");

        // The original still reads as stuck, but the successful sibling
        // settles it; later cycles must not spawn duplicates of done work.
        agent.iteration().await.unwrap();
        agent.iteration().await.unwrap();

        let siblings = store
            .list(|t| t.meta_str("recovered_from") == Some("flaky"))
            .unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].task_id, "flaky-alt-01");
    }

    #[tokio::test]
    async fn archived_sibling_still_counts_as_resolution() {
        let (_dir, store) = open_store();
        stuck_task(&store, "flaky", "boom");

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();
        complete_directly(&store, "flaky-alt-01", "worker-2");
        store.archive("flaky-alt-01").unwrap();

        agent.iteration().await.unwrap();
        assert!(store.read("flaky-alt-02").is_err());
    }

    #[tokio::test]
    async fn failed_sibling_escalates_to_another_attempt() {
        let (_dir, store) = open_store();
        stuck_task(&store, "flaky", "boom");

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();

        // The alternative approach bombs out too.
        OptimisticClaimer
            .try_claim(&store, "flaky-alt-01", "worker-2", &AgentType::Auto)
            .unwrap();
        store.mark_in_progress("flaky-alt-01", "worker-2").unwrap();
        store
            .fail("flaky-alt-01", "worker-2", "boom again", Map::new())
            .unwrap();

        agent.iteration().await.unwrap();
        let second = store.read("flaky-alt-02").unwrap();
        assert_eq!(second.status, TaskStatus::Available);
        assert_eq!(second.meta_str("recovered_from"), Some("flaky"));
        assert_eq!(second.metadata["recovery_attempt"], Value::from(2));
    }

    #[tokio::test]
    async fn below_threshold_failures_are_left_alone() {
        let (_dir, store) = open_store();
        let mut task = TaskRecord::new("once", "t", "d", AgentType::Terminal);
        task.status = TaskStatus::Available;
        store.create(&task).unwrap();
        OptimisticClaimer
            .try_claim(&store, "once", "worker-1", &AgentType::Terminal)
            .unwrap();
        store.mark_in_progress("once", "worker-1").unwrap();
        store.fail("once", "worker-1", "boom", Map::new()).unwrap();

        let mut agent = agent_loop(
            store.clone(),
            Box::new(RecoveryExecutor::new(2)),
            "recovery-1",
        );
        agent.iteration().await.unwrap();

        assert!(store
            .list(|t| t.meta_flag("created_by_recovery"))
            .unwrap()
            .is_empty());
    }
}

mod terminal_tests {
    use super::*;

    #[tokio::test]
    async fn explicit_commands_run_and_save_results() {
        let (_dir, store) = open_store();
        let mut task = TaskRecord::new("term", "echo check", "print a marker", AgentType::Terminal);
        task.status = TaskStatus::Available;
        task.metadata
            .insert("specific_commands".into(), Value::from(vec!["echo hello"]));
        store.create(&task).unwrap();

        let mut agent = agent_loop(
            store.clone(),
            Box::new(TerminalExecutor::new(std::time::Duration::from_secs(10))),
            "terminal-1",
        );
        agent.iteration().await.unwrap();

        let done = store.read("term").unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let artifact = store.task_dir("term").join("terminal_results.json");
        let raw = std::fs::read_to_string(artifact).unwrap();
        assert!(raw.contains("hello"));
    }

    #[tokio::test]
    async fn commands_exceeding_the_timeout_fail_the_task() {
        let (_dir, store) = open_store();
        let mut task = TaskRecord::new("slow", "long wait", "sit idle", AgentType::Terminal);
        task.status = TaskStatus::Available;
        task.metadata
            .insert("specific_commands".into(), Value::from(vec!["sleep 5"]));
        store.create(&task).unwrap();

        let mut agent = agent_loop(
            store.clone(),
            Box::new(TerminalExecutor::new(std::time::Duration::from_millis(
                200,
            ))),
            "terminal-1",
        );
        agent.iteration().await.unwrap();

        // First failure requeues; the saved outcome records the expiry.
        let requeued = store.read("slow").unwrap();
        assert_eq!(requeued.status, TaskStatus::Available);
        assert_eq!(requeued.retry_count, 1);

        let raw =
            std::fs::read_to_string(store.task_dir("slow").join("terminal_results.json")).unwrap();
        let saved: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved["results"][0]["timed_out"], Value::Bool(true));
        assert!(saved["results"][0]["exit_code"].is_null());
    }

    #[tokio::test]
    async fn refused_commands_fail_the_task() {
        let (_dir, store) = open_store();
        let mut task = TaskRecord::new("bad", "cleanup", "remove files", AgentType::Terminal);
        task.status = TaskStatus::Available;
        task.metadata.insert(
            "specific_commands".into(),
            Value::from(vec!["rm important.txt"]),
        );
        store.create(&task).unwrap();

        let mut agent = agent_loop(
            store.clone(),
            Box::new(TerminalExecutor::new(std::time::Duration::from_secs(10))),
            "terminal-1",
        );

        // First failure requeues the task for another attempt.
        agent.iteration().await.unwrap();
        let requeued = store.read("bad").unwrap();
        assert_eq!(requeued.status, TaskStatus::Available);
        assert_eq!(requeued.retry_count, 1);
        assert!(requeued.claimed_by.is_none());

        // Second failure reaches the stuck threshold and sticks.
        agent.iteration().await.unwrap();
        let failed = store.read("bad").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 2);
    }
}

mod handler_tests {
    use super::*;
    use std::time::Duration;
    use task_swarm::agent::handler::HandlerExecutor;

    #[tokio::test]
    async fn handler_exceeding_the_timeout_fails_the_task() {
        let (_dir, store) = open_store();
        let mut task = TaskRecord::new("lookup", "find docs", "d", AgentType::Search);
        task.status = TaskStatus::Available;
        store.create(&task).unwrap();

        let mut agent = agent_loop(
            store.clone(),
            Box::new(HandlerExecutor::new(
                "search",
                "sleep 5",
                Duration::from_millis(200),
            )),
            "search-1",
        );
        agent.iteration().await.unwrap();

        let requeued = store.read("lookup").unwrap();
        assert_eq!(requeued.status, TaskStatus::Available);
        assert_eq!(requeued.retry_count, 1);
        let result = requeued.result.unwrap();
        assert!(result["error"].as_str().unwrap().contains("timed out"));
    }
}

mod signal_loop_tests {
    use super::*;

    #[tokio::test]
    async fn signalled_agent_releases_its_task() {
        let (_dir, store) = open_store();
        // A search task so the terminal executor will not re-claim it
        // after the release.
        let mut task = TaskRecord::new("held", "long work", "d", AgentType::Search);
        task.status = TaskStatus::Available;
        store.create(&task).unwrap();
        OptimisticClaimer
            .try_claim(&store, "held", "terminal-1", &AgentType::Auto)
            .unwrap();

        store
            .send_signal("terminal-1", "held", "operator interrupt")
            .unwrap();

        // The next iteration consumes the signal before scanning. No
        // candidates remain (the task is claimed), so only the release runs.
        let mut agent = agent_loop(
            store.clone(),
            Box::new(TerminalExecutor::new(std::time::Duration::from_secs(5))),
            "terminal-1",
        );
        agent.iteration().await.unwrap();

        let released = store.read("held").unwrap();
        assert_eq!(released.status, TaskStatus::Available);
        assert!(released.claimed_by.is_none());
    }
}

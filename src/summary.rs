//! Workspace status reporting for the CLI.

use crate::error::Result;
use crate::store::TaskStore;
use crate::types::{TaskRecord, TaskStatus};
use std::collections::BTreeMap;
use std::fmt;

/// Counts of active tasks by status, plus the stuck subset.
#[derive(Debug, Default)]
pub struct StatusSummary {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub stuck: Vec<String>,
}

impl StatusSummary {
    pub fn collect(store: &TaskStore, stuck_threshold: u32) -> Result<Self> {
        let tasks = store.list(|_| true)?;
        let mut summary = StatusSummary {
            total: tasks.len(),
            ..Default::default()
        };
        for task in &tasks {
            *summary.by_status.entry(task.status.as_str()).or_insert(0) += 1;
            if task.is_stuck(stuck_threshold) {
                summary.stuck.push(task.task_id.clone());
            }
        }
        Ok(summary)
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} active task(s)", self.total)?;
        for (status, count) in &self.by_status {
            writeln!(f, "  {:<12} {}", status, count)?;
        }
        if !self.stuck.is_empty() {
            writeln!(f, "stuck:")?;
            for id in &self.stuck {
                writeln!(f, "  {}", id)?;
            }
        }
        Ok(())
    }
}

/// One task rendered for `show`: the record fields plus the log tail.
pub fn render_task(task: &TaskRecord, log_tail: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("task:        {}\n", task.task_id));
    out.push_str(&format!("title:       {}\n", task.title));
    out.push_str(&format!("status:      {}\n", task.status));
    out.push_str(&format!("agent type:  {}\n", task.agent_type));
    out.push_str(&format!("priority:    {}\n", task.priority));
    out.push_str(&format!("progress:    {:.0}%\n", task.progress * 100.0));
    out.push_str(&format!("retries:     {}\n", task.retry_count));
    if let Some(holder) = &task.claimed_by {
        out.push_str(&format!("claimed by:  {}\n", holder));
    }
    if !task.dependencies.is_empty() {
        out.push_str(&format!("depends on:  {}\n", task.dependencies.join(", ")));
    }
    if task.status == TaskStatus::Failed {
        if let Some(error) = task
            .result
            .as_ref()
            .and_then(|r| r.get("error"))
            .and_then(serde_json::Value::as_str)
        {
            out.push_str(&format!("error:       {}\n", error));
        }
    }
    if !log_tail.is_empty() {
        out.push_str("\nrecent log:\n");
        out.push_str(log_tail);
        out.push('\n');
    }
    out
}

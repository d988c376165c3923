//! Terminal agent: runs shell commands for `terminal` tasks.
//!
//! Commands come from the task's `specific_commands` metadata when a
//! breakdown or planning step supplied them, otherwise from a small
//! keyword-to-command table over the description. Every command passes a
//! safety screen first, and each runs under the configured wall-clock
//! timeout with the child killed on expiry.

use super::{AgentExecutor, Disposition};
use crate::store::TaskStore;
use crate::types::{ActionResult, AgentType, TaskRecord};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Substrings that make a command unconditionally refused.
const DENYLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "sudo rm",
    "dd if=",
    "mkfs",
    "> /dev/sd",
    "chmod -r 777 /",
    ":(){ :|:& };:",
];

/// Prefixes that would need interactive confirmation; refused because the
/// agent runs unattended.
const CONFIRMATION_REQUIRED: &[&str] = &["rm ", "rmdir ", "mv ", "kill ", "pkill "];

pub struct TerminalExecutor {
    timeout: Duration,
}

impl TerminalExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn commands_for(&self, task: &TaskRecord) -> Vec<String> {
        if let Some(commands) = task
            .metadata
            .get("specific_commands")
            .and_then(Value::as_array)
        {
            let listed: Vec<String> = commands
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if !listed.is_empty() {
                return listed;
            }
        }
        extract_commands(&task.title, &task.description)
    }

    async fn run_command(&self, command: &str) -> std::io::Result<CommandOutcome> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(CommandOutcome {
                    command: command.to_string(),
                    timed_out: false,
                    exit_code: output.status.code(),
                    stdout: truncate(&String::from_utf8_lossy(&output.stdout)),
                    stderr: truncate(&String::from_utf8_lossy(&output.stderr)),
                })
            }
            Err(_) => {
                // wait_with_output consumed the child; kill_on_drop reaps it.
                Ok(CommandOutcome {
                    command: command.to_string(),
                    timed_out: true,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("timed out after {:?}", self.timeout),
                })
            }
        }
    }
}

struct CommandOutcome {
    command: String,
    timed_out: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutcome {
    fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn to_value(&self) -> Value {
        json!({
            "command": self.command,
            "timed_out": self.timed_out,
            "exit_code": self.exit_code,
            "stdout": self.stdout,
            "stderr": self.stderr,
        })
    }
}

#[async_trait]
impl AgentExecutor for TerminalExecutor {
    fn role(&self) -> &str {
        "terminal"
    }

    fn capability(&self) -> AgentType {
        AgentType::Terminal
    }

    async fn execute(&self, store: &TaskStore, task: &TaskRecord) -> (ActionResult, Disposition) {
        let commands = self.commands_for(task);
        if commands.is_empty() {
            return (
                ActionResult::err("no runnable command could be derived from the task"),
                Disposition::Fail,
            );
        }

        // Commands run in order; the first refusal or failure stops the
        // sequence since later steps usually depend on earlier output.
        let mut outcomes = Vec::with_capacity(commands.len());
        for command in &commands {
            if let Err(reason) = screen_command(command) {
                warn!(task_id = %task.task_id, command, reason, "command refused");
                outcomes.push(json!({
                    "command": command,
                    "refused": reason,
                }));
                break;
            }
            debug!(task_id = %task.task_id, command, "running command");
            match self.run_command(command).await {
                Ok(outcome) => {
                    let ok = outcome.succeeded();
                    outcomes.push(outcome.to_value());
                    if !ok {
                        break;
                    }
                }
                Err(e) => {
                    outcomes.push(json!({
                        "command": command,
                        "spawn_error": e.to_string(),
                    }));
                    break;
                }
            }
        }

        let artifact = json!({ "results": outcomes });
        if let Err(e) = store.write_artifact(&task.task_id, "terminal_results.json", &artifact) {
            warn!(task_id = %task.task_id, error = %e, "could not save terminal results");
        }

        let ran = artifact["results"]
            .as_array()
            .map(|a| a.len())
            .unwrap_or(0);
        let all_ok = artifact["results"]
            .as_array()
            .map(|a| {
                a.iter().all(|o| {
                    o.get("exit_code").and_then(Value::as_i64) == Some(0)
                        && o.get("timed_out").and_then(Value::as_bool) == Some(false)
                })
            })
            .unwrap_or(false);

        if all_ok {
            (
                ActionResult::ok(format!("{} command(s) executed", ran))
                    .with("results", artifact["results"].clone()),
                Disposition::Complete,
            )
        } else {
            (
                ActionResult::err("one or more commands failed, timed out, or were refused")
                    .with("results", artifact["results"].clone()),
                Disposition::Fail,
            )
        }
    }
}

fn truncate(s: &str) -> String {
    const LIMIT: usize = 4000;
    if s.len() <= LIMIT {
        return s.to_string();
    }
    let mut end = LIMIT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Refuse destructive or confirmation-requiring commands.
fn screen_command(command: &str) -> Result<(), &'static str> {
    let lowered = command.to_lowercase();
    if DENYLIST.iter().any(|d| lowered.contains(d)) {
        return Err("destructive command");
    }
    if CONFIRMATION_REQUIRED
        .iter()
        .any(|p| lowered.trim_start().starts_with(p))
    {
        return Err("requires interactive confirmation");
    }
    Ok(())
}

/// Fallback command table for tasks without explicit commands.
fn extract_commands(title: &str, description: &str) -> Vec<String> {
    let text = format!("{} {}", title, description).to_lowercase();
    if text.contains("python file") || text.contains("*.py") || text.contains("python scripts") {
        vec!["find . -name '*.py' | head -20".to_string()]
    } else if text.contains("git status") || text.contains("repository status") {
        vec!["git status".to_string()]
    } else if text.contains("git log") || text.contains("change history") || text.contains("recent commits") {
        vec!["git log --oneline -20".to_string()]
    } else if text.contains("disk") || text.contains("space") {
        vec!["df -h".to_string(), "du -sh . 2>/dev/null".to_string()]
    } else if text.contains("list") || text.contains("directory") || text.contains("files") {
        vec!["ls -la".to_string()]
    } else if text.contains("environment") || text.contains("working") {
        vec!["pwd".to_string(), "ls -la".to_string()]
    } else {
        Vec::new()
    }
}

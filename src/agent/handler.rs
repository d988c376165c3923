//! External-handler agent: delegates task execution to a configured
//! command (e.g. a search script or a file-operations helper).
//!
//! The handler receives the full task record as JSON on stdin and must
//! print an action-result JSON object (`{"success": bool, ...}`) on
//! stdout. Bad JSON, a non-zero exit without output, or a timeout all
//! count as a failed attempt for the task.

use super::{AgentExecutor, Disposition};
use crate::store::TaskStore;
use crate::types::{ActionResult, AgentType, TaskRecord};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub struct HandlerExecutor {
    role: String,
    capability: AgentType,
    command: String,
    timeout: Duration,
}

impl HandlerExecutor {
    pub fn new(role: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        let role = role.into();
        let capability = AgentType::from(role.clone());
        Self {
            role,
            capability,
            command: command.into(),
            timeout,
        }
    }

    async fn invoke(&self, task: &TaskRecord) -> Result<ActionResult, String> {
        let payload =
            serde_json::to_vec(task).map_err(|e| format!("task serialization failed: {}", e))?;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("handler spawn failed: {}", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                return Err(format!("could not write task to handler: {}", e));
            }
            // Close stdin so line-reading handlers see EOF.
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("handler wait failed: {}", e)),
            Err(_) => return Err(format!("handler timed out after {:?}", self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "handler exited with {:?}: {}",
                output.status.code(),
                truncate(&stderr)
            ));
        }
        serde_json::from_str::<ActionResult>(stdout.trim())
            .map_err(|e| format!("handler output was not a result object: {}", e))
    }
}

#[async_trait]
impl AgentExecutor for HandlerExecutor {
    fn role(&self) -> &str {
        &self.role
    }

    fn capability(&self) -> AgentType {
        self.capability.clone()
    }

    async fn execute(&self, store: &TaskStore, task: &TaskRecord) -> (ActionResult, Disposition) {
        debug!(task_id = %task.task_id, handler = %self.command, "invoking handler");
        match self.invoke(task).await {
            Ok(result) if result.success => {
                // Search findings also land in the shared results area so
                // other agents can read them without claiming the task.
                if self.capability == AgentType::Search && !result.payload.is_empty() {
                    let payload = serde_json::Value::Object(result.payload.clone());
                    if let Err(e) =
                        store.write_search_result(&task.task_id, "findings.json", &payload)
                    {
                        warn!(task_id = %task.task_id, error = %e, "could not save search findings");
                    }
                }
                (result, Disposition::Complete)
            }
            Ok(result) => (result, Disposition::Fail),
            Err(reason) => {
                warn!(task_id = %task.task_id, reason, "handler invocation failed");
                (ActionResult::err(reason), Disposition::Fail)
            }
        }
    }
}

fn truncate(s: &str) -> String {
    const LIMIT: usize = 2000;
    if s.len() <= LIMIT {
        return s.to_string();
    }
    let mut end = LIMIT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

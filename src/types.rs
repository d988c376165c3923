//! Core types for the shared-workspace task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle status of a task record.
///
/// `Stuck` exists so records written by implementations that persist it still
/// parse; this implementation treats stuckness as a query predicate instead
/// (see [`TaskRecord::is_stuck`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Available,
    Claimed,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
    Stuck,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::Available => "available",
            TaskStatus::Claimed => "claimed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Stuck => "stuck",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(TaskStatus::NotStarted),
            "available" => Some(TaskStatus::Available),
            "claimed" => Some(TaskStatus::Claimed),
            "in_progress" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            "stuck" => Some(TaskStatus::Stuck),
            _ => None,
        }
    }

    /// Terminal states. `Failed` is terminal too unless a recovery sibling
    /// is spawned; the failed record itself never transitions back.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }

    /// Legal state-machine edges. Same-status rewrites are allowed so that
    /// progress/metadata updates need no special casing.
    ///
    /// `claimed|in_progress -> available` is the forced release: the only
    /// backward edge, and it must clear `claimed_by`/`claimed_at`.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (NotStarted, Available | Blocked | Cancelled)
                | (Blocked, Available | Cancelled)
                | (Available, Claimed | Cancelled)
                | (Claimed, InProgress | Available | Cancelled)
                | (InProgress, Completed | Failed | Available | Cancelled)
                | (Failed, Stuck)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tag used for claim-time filtering. Open-ended: unknown tags
/// written by other agents round-trip as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentType {
    Search,
    FileOperations,
    Terminal,
    Planning,
    Breakdown,
    Auto,
    Custom(String),
}

impl AgentType {
    pub fn as_str(&self) -> &str {
        match self {
            AgentType::Search => "search",
            AgentType::FileOperations => "file_operations",
            AgentType::Terminal => "terminal",
            AgentType::Planning => "planning",
            AgentType::Breakdown => "breakdown",
            AgentType::Auto => "auto",
            AgentType::Custom(s) => s,
        }
    }
}

impl From<String> for AgentType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "search" => AgentType::Search,
            "file_operations" => AgentType::FileOperations,
            "terminal" => AgentType::Terminal,
            "planning" => AgentType::Planning,
            "breakdown" => AgentType::Breakdown,
            "auto" => AgentType::Auto,
            _ => AgentType::Custom(s),
        }
    }
}

impl From<AgentType> for String {
    fn from(t: AgentType) -> Self {
        t.as_str().to_string()
    }
}

impl Default for AgentType {
    fn default() -> Self {
        AgentType::Auto
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory priority, 1 (lowest) to 5 (highest). No component enforces
/// ordering by priority; it is informational display only.
pub type Priority = i32;

pub const PRIORITY_HIGH: Priority = 4;
pub const PRIORITY_MEDIUM: Priority = 3;
pub const PRIORITY_LOW: Priority = 2;

/// Parse a priority string ("high", "medium", "low", or a number 1-5).
/// Returns medium for unrecognized values.
pub fn parse_priority(s: &str) -> Priority {
    match s.to_lowercase().as_str() {
        "high" => PRIORITY_HIGH,
        "medium" => PRIORITY_MEDIUM,
        "low" => PRIORITY_LOW,
        other => other
            .parse()
            .map(|p: Priority| p.clamp(1, 5))
            .unwrap_or(PRIORITY_MEDIUM),
    }
}

fn default_priority() -> Priority {
    PRIORITY_MEDIUM
}

/// The central entity: one unit of work and its lifecycle state, persisted
/// as `task.json` inside the task's directory.
///
/// Unknown fields land in `extra` and are preserved on rewrite, so future
/// metadata survives round-trips through older agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub agent_type: AgentType,
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRecord {
    /// New record in `not_started` with defaults. Callers adjust status,
    /// dependencies, and metadata before handing it to the store.
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: description.into(),
            agent_type,
            status: TaskStatus::NotStarted,
            priority: PRIORITY_MEDIUM,
            progress: 0.0,
            dependencies: Vec::new(),
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            retry_count: 0,
            metadata: Map::new(),
            result: None,
            extra: Map::new(),
        }
    }

    /// Stuck predicate: failed and retried at least `threshold` times.
    pub fn is_stuck(&self, threshold: u32) -> bool {
        self.status == TaskStatus::Failed && self.retry_count >= threshold
    }

    /// Whether an agent with the given capability may claim this task.
    /// `auto` tasks match any capability; `auto` agents match any task.
    pub fn capability_matches(&self, capability: &AgentType) -> bool {
        self.agent_type == AgentType::Auto
            || *capability == AgentType::Auto
            || self.agent_type == *capability
    }

    /// Boolean metadata lookup, absent means false.
    pub fn meta_flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// String metadata lookup.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// One step of a decomposition plan. Transient: each step is materialized
/// as a child task record and the plan itself is not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub description: String,
    pub agent_type: AgentType,
    pub needs_planning: bool,
    pub estimated_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_commands: Option<Vec<String>>,
}

impl StepDescriptor {
    pub fn new(
        description: impl Into<String>,
        agent_type: AgentType,
        needs_planning: bool,
        estimated_minutes: u32,
    ) -> Self {
        Self {
            description: description.into(),
            agent_type,
            needs_planning,
            estimated_minutes,
            specific_commands: None,
        }
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.specific_commands = Some(commands);
        self
    }
}

/// The agent-to-agent result contract. The claim protocol and state machine
/// depend only on `success` and timing, never on payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            payload: Map::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    /// Flatten into the map stored on the task record's `result` field.
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(self.success));
        if let Some(m) = self.message {
            map.insert("message".into(), Value::String(m));
        }
        if let Some(e) = self.error {
            map.insert("error".into(), Value::String(e));
        }
        map.extend(self.payload);
        map
    }
}

/// Inter-agent interrupt notice, dropped in the `agent_signals` area and
/// consumed best-effort by the targeted agent on its next poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub recipient: String,
    pub task_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Generate a workspace-unique task id: `{prefix}-{timestamp}-{uuid8}`.
pub fn generate_task_id(prefix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, stamp, &suffix[..8])
}

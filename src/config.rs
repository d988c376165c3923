//! Workspace configuration.
//!
//! A single YAML file (`swarm.yaml`) at the workspace root, shared by
//! convention across all agent processes. Every field has a default so the
//! file is optional; a missing file means defaults. Nothing enforces that
//! all agents read the same values; an inconsistent poll interval only
//! affects propagation latency, not correctness.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "swarm.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Seconds between poll-loop scans.
    pub poll_interval_secs: u64,
    /// Wall-clock budget per command/handler invocation.
    pub command_timeout_secs: u64,
    /// `retry_count` at which a failed task counts as stuck.
    pub stuck_threshold: u32,
    /// Prefix for audit commit messages.
    pub commit_prefix: String,
    /// Whether task store mutations are committed to the audit log.
    pub audit: bool,
    /// Remote to clone the workspace repository from on first use.
    pub audit_remote: Option<String>,
    /// External handler commands keyed by role name ("search",
    /// "file_operations", ...). The handler receives the task record as
    /// JSON on stdin and must print an action-result JSON object.
    pub handlers: HashMap<String, String>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
            command_timeout_secs: 30,
            stuck_threshold: 2,
            commit_prefix: "[swarm]".to_string(),
            audit: true,
            audit_remote: None,
            handlers: HashMap::new(),
        }
    }
}

impl SwarmConfig {
    /// Load from `swarm.yaml` under the workspace root, falling back to
    /// defaults when the file does not exist.
    pub fn load(workspace_root: &Path) -> anyhow::Result<Self> {
        let path = workspace_root.join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: SwarmConfig = serde_yaml::from_str(&raw)?;
        debug!(path = %path.display(), "loaded workspace config");
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SwarmConfig::default();
        assert_eq!(config.poll_interval_secs, 3);
        assert_eq!(config.stuck_threshold, 2);
        assert!(config.audit);
        assert!(config.handlers.is_empty());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: SwarmConfig =
            serde_yaml::from_str("poll_interval_secs: 10\naudit: false\n").unwrap();
        assert_eq!(config.poll_interval_secs, 10);
        assert!(!config.audit);
        assert_eq!(config.command_timeout_secs, 30);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SwarmConfig::load(dir.path()).unwrap();
        assert_eq!(config.stuck_threshold, 2);
    }
}

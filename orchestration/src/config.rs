//! Process-wide orchestrator configuration.
//!
//! Resolved once from the environment at startup and immutable afterwards.
//! Runtime key/value configuration rows live in the persistence store; this
//! struct only carries the limits and timeouts the engine itself needs.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits and timeouts governing a single workflow run.
///
/// | Field                      | Default | Meaning                                  |
/// |----------------------------|---------|------------------------------------------|
/// | max_debug_attempts         | 2       | run-tests ↔ debug-code loop bound        |
/// | max_human_debug_attempts   | 2       | post-validation assisted-debug bound     |
/// | max_nodes_safety_limit     | 15      | node dispatches before forced stop       |
/// | global_timeout_secs        | 3600    | whole-run wall clock                     |
/// | node_timeout_secs          | 600     | single node wall clock                   |
/// | max_retry_attempts         | 2       | per-node retries on transient failures   |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_debug_attempts: u32,
    pub max_human_debug_attempts: u32,
    pub max_nodes_safety_limit: u32,
    pub global_timeout_secs: u64,
    pub node_timeout_secs: u64,
    pub max_retry_attempts: u32,
    /// Final validation timeout when the run was triggered by a command or
    /// reactivation.
    pub validation_timeout_command_secs: u64,
    /// Final validation timeout for question-type interactions.
    pub validation_timeout_question_secs: u64,
    /// Delay before the single Slack reminder. `None` disables the reminder.
    pub validation_reminder_secs: Option<u64>,
    /// Interval between polls while waiting on a human response.
    pub validation_poll_interval_secs: u64,
    /// Validation requests expire this long after creation.
    pub validation_expiry_secs: u64,
    /// Maximum workflows executing in parallel across workers.
    pub max_parallel_workflows: usize,
    /// Monday column that mirrors the last merged PR URL, if configured.
    pub monday_repository_url_column_id: Option<String>,
    /// Inbound webhook signing secret. The HTTP surface lives outside this
    /// crate; the value is carried here so one config covers the process.
    pub signing_secret: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_debug_attempts: 2,
            max_human_debug_attempts: 2,
            max_nodes_safety_limit: 15,
            global_timeout_secs: 3600,
            node_timeout_secs: 600,
            max_retry_attempts: 2,
            validation_timeout_command_secs: 3600,
            validation_timeout_question_secs: 600,
            validation_reminder_secs: Some(1800),
            validation_poll_interval_secs: 10,
            validation_expiry_secs: 24 * 3600,
            max_parallel_workflows: 4,
            monday_repository_url_column_id: None,
            signing_secret: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        fn read<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = read("MAX_DEBUG_ATTEMPTS") {
            cfg.max_debug_attempts = v;
        }
        if let Some(v) = read("MAX_HUMAN_DEBUG_ATTEMPTS") {
            cfg.max_human_debug_attempts = v;
        }
        if let Some(v) = read("MAX_NODES_SAFETY_LIMIT") {
            cfg.max_nodes_safety_limit = v;
        }
        if let Some(v) = read("WORKFLOW_TIMEOUT_SECONDS") {
            cfg.global_timeout_secs = v;
        }
        if let Some(v) = read("NODE_TIMEOUT_SECONDS") {
            cfg.node_timeout_secs = v;
        }
        if let Some(v) = read("MAX_RETRY_ATTEMPTS") {
            cfg.max_retry_attempts = v;
        }
        if let Some(v) = read("VALIDATION_TIMEOUT_COMMAND") {
            cfg.validation_timeout_command_secs = v;
        }
        if let Some(v) = read("VALIDATION_TIMEOUT_QUESTION") {
            cfg.validation_timeout_question_secs = v;
        }
        if let Some(v) = read("VALIDATION_REMINDER_SECONDS") {
            cfg.validation_reminder_secs = Some(v);
        }
        if let Some(v) = read("MAX_PARALLEL_WORKFLOWS") {
            cfg.max_parallel_workflows = v;
        }
        if let Ok(v) = std::env::var("MONDAY_REPOSITORY_URL_COLUMN_ID") {
            if !v.is_empty() {
                cfg.monday_repository_url_column_id = Some(v);
            }
        }
        if let Ok(v) = std::env::var("WEBHOOK_SIGNING_SECRET") {
            if !v.is_empty() {
                cfg.signing_secret = Some(v);
            }
        }

        cfg
    }

    /// Load a config file, overlaying the defaults. Missing fields keep
    /// their default values.
    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let partial: toml::Value = toml::from_str(&raw)?;
        let mut cfg = Self::default();

        let mut merged = toml::Value::try_from(&cfg)?;
        if let (Some(base), Some(overlay)) = (merged.as_table_mut(), partial.as_table()) {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        }
        cfg = merged.try_into()?;
        Ok(cfg)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    /// Final validation timeout for a given interaction kind.
    pub fn validation_timeout(&self, is_command: bool) -> Duration {
        if is_command {
            Duration::from_secs(self.validation_timeout_command_secs)
        } else {
            Duration::from_secs(self.validation_timeout_question_secs)
        }
    }
}

static CONFIG: OnceLock<OrchestratorConfig> = OnceLock::new();

/// Install a config for the process. Later calls are ignored; the first
/// installation wins.
pub fn init_config(config: OrchestratorConfig) -> &'static OrchestratorConfig {
    CONFIG.get_or_init(|| config)
}

/// Process-wide config, initializing from the environment on first use.
pub fn config() -> &'static OrchestratorConfig {
    CONFIG.get_or_init(OrchestratorConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_calibration() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.max_debug_attempts, 2);
        assert_eq!(cfg.max_human_debug_attempts, 2);
        assert_eq!(cfg.max_nodes_safety_limit, 15);
        assert_eq!(cfg.global_timeout_secs, 3600);
        assert_eq!(cfg.node_timeout_secs, 600);
        assert_eq!(cfg.max_retry_attempts, 2);
        assert_eq!(cfg.validation_timeout_command_secs, 3600);
        assert_eq!(cfg.validation_timeout_question_secs, 600);
        assert_eq!(cfg.validation_poll_interval_secs, 10);
    }

    #[test]
    fn test_toml_overlay_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.toml");
        std::fs::write(&path, "max_debug_attempts = 3\nglobal_timeout_secs = 7200\n").unwrap();

        let cfg = OrchestratorConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.max_debug_attempts, 3);
        assert_eq!(cfg.global_timeout_secs, 7200);
        // Untouched fields keep their defaults
        assert_eq!(cfg.node_timeout_secs, 600);
        assert_eq!(cfg.max_nodes_safety_limit, 15);
    }

    #[test]
    fn test_validation_timeout_selection() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(
            cfg.validation_timeout(true),
            Duration::from_secs(cfg.validation_timeout_command_secs)
        );
        assert_eq!(
            cfg.validation_timeout(false),
            Duration::from_secs(cfg.validation_timeout_question_secs)
        );
    }
}

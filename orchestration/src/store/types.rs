//! Persisted record types.
//!
//! These rows are stored as bincode values in their column families and are
//! never deleted by the core; audit history is retained across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{TaskPriority, TaskStatus, TaskType, WorkflowStatus};

/// A persistent unit of work bound to one external item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: i64,
    /// External (Monday) item id.
    pub external_id: i64,
    pub board_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub repository_url: Option<String>,
    pub priority: TaskPriority,
    pub task_type: TaskType,
    pub internal_status: TaskStatus,
    /// String mirror of the external status column.
    pub external_status: Option<String>,
    pub creator_name: Option<String>,
    pub creator_id: Option<i64>,
    /// URL of the most recently merged PR for this task.
    pub last_merged_pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One execution attempt of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: i64,
    /// Process-generated correlation id.
    pub uuid_run_id: String,
    pub task_id: i64,
    pub workflow_id: String,
    pub ai_provider: Option<String>,
    pub reactivation_count: u32,
    pub source_branch: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
    pub metrics: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Update id of the Monday comment that spawned this run, if any.
    pub triggered_by: Option<String>,
}

/// One node execution within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: i64,
    pub run_id: i64,
    pub node_name: String,
    /// Monotonic per run, matching graph execution order.
    pub step_order: u32,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error: Option<String>,
}

/// Per-prompt LLM call attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteractionRecord {
    pub interaction_id: i64,
    pub step_id: i64,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
    pub cost_estimate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Kind of code-generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    Initial,
    Modification,
    Debug,
}

impl std::fmt::Display for GenerationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Modification => write!(f, "modification"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// Per-run code-generation artifact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeGenerationRecord {
    pub generation_id: i64,
    pub run_id: i64,
    pub provider: String,
    pub model: String,
    pub generation_type: GenerationType,
    pub files_modified: Vec<String>,
    pub tokens: u32,
    pub latency_ms: u64,
    pub cost: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Per-run test result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultRecord {
    pub result_id: i64,
    pub run_id: i64,
    pub passed: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub skipped_tests: u32,
    pub coverage_percent: Option<f64>,
    pub report: Option<serde_json::Value>,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Status of a persisted pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestStatus {
    Open,
    Merged,
    Closed,
}

/// Pull request row. Requires both task and run ids to be written; the
/// store rejects the insert otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub task_id: i64,
    pub run_id: i64,
    pub external_number: i64,
    pub url: String,
    pub title: String,
    pub head_branch: String,
    pub base_branch: String,
    pub head_sha: Option<String>,
    pub status: PullRequestStatus,
    pub merge_commit_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record of a Monday comment that spawned a new run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTriggerRecord {
    pub trigger_id: i64,
    pub task_id: i64,
    /// External update id.
    pub update_id: String,
    pub classification: String,
    pub confidence: f64,
    /// Filled in once the spawned run exists; stays null for question-type
    /// updates that never opened a run.
    pub triggered_run_id: Option<i64>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Node checkpoint blob saved after each successful node exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub run_id: i64,
    pub node_name: String,
    pub completed_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Application event row for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEventRecord {
    pub task_id: Option<i64>,
    pub level: String,
    pub source: String,
    pub action: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Value type tag for configuration entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValueType {
    String,
    Integer,
    Float,
    Boolean,
    Json,
}

/// Key/value configuration entry, independent of any task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub value_type: ConfigValueType,
    pub updated_at: DateTime<Utc>,
}

/// Performance metrics recorded when a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub duration_seconds: f64,
    pub nodes_executed: u32,
    pub files_modified: u32,
    pub tests_executed: u32,
    pub debug_attempts: u32,
    pub qa_score: Option<u32>,
    #[serde(default)]
    pub auto_approved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_type_roundtrip() {
        let json = serde_json::to_string(&GenerationType::Modification).unwrap();
        assert_eq!(json, "\"modification\"");
        let back: GenerationType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GenerationType::Modification);
    }

    #[test]
    fn test_unknown_pr_status_rejected() {
        assert!(serde_json::from_str::<PullRequestStatus>("\"draft\"").is_err());
    }
}

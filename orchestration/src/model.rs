//! Domain types shared across the engine: task requests, status enums and
//! the inbound work-item envelope.
//!
//! All tagged enums are serde-total: unknown tags are rejected at the
//! boundary instead of being silently coerced.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Bugfix,
    Refactor,
    Documentation,
    Testing,
    UiChange,
    Performance,
    Analysis,
}

impl TaskType {
    /// Parse a loosely-formatted Monday column value ("Bug", "ui change"…).
    pub fn parse_lenient(text: &str) -> Self {
        match text.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "bug" | "bugfix" | "fix" => Self::Bugfix,
            "refactor" | "refactoring" => Self::Refactor,
            "documentation" | "docs" => Self::Documentation,
            "testing" | "test" | "tests" => Self::Testing,
            "ui_change" | "ui" => Self::UiChange,
            "performance" | "perf" => Self::Performance,
            "analysis" => Self::Analysis,
            _ => Self::Feature,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Refactor => "refactor",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::UiChange => "ui_change",
            Self::Performance => "performance",
            Self::Analysis => "analysis",
        };
        write!(f, "{}", s)
    }
}

/// Task priority, ordered low → urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn parse_lenient(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "urgent" | "critical" => Self::Urgent,
            _ => Self::Medium,
        }
    }

    /// Worker-pool submission priority (0-9 scale).
    pub fn submission_priority(&self) -> u8 {
        match self {
            Self::Urgent => 9,
            Self::High => 7,
            Self::Medium => 5,
            Self::Low => 3,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        write!(f, "{}", s)
    }
}

/// Internal task status mirrored into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Status of a workflow run or node step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// A fully-resolved request for one workflow run.
///
/// Built from a webhook payload, a reactivation trigger or a mention-derived
/// command; threaded through the graph as `state.task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// External item id as a string (stable across sources).
    pub task_id: String,
    pub title: String,
    pub description: String,
    #[serde(default = "default_task_type")]
    pub task_type: TaskType,
    #[serde(default = "default_priority")]
    pub priority: TaskPriority,
    pub repository_url: Option<String>,
    pub branch_name: Option<String>,
    pub base_branch: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub technical_context: Option<String>,
    pub files_to_modify: Option<Vec<String>>,
    pub estimated_complexity: Option<String>,

    pub monday_item_id: Option<i64>,
    pub board_id: Option<i64>,
    /// Task row id once known, so a reactivation reuses the same task.
    pub task_db_id: Option<i64>,
    /// Pre-created run row id for update-triggered runs.
    pub run_id: Option<i64>,

    pub creator_name: Option<String>,
    pub creator_id: Option<i64>,

    #[serde(default)]
    pub is_reactivation: bool,
    pub reactivation_context: Option<String>,
    #[serde(default)]
    pub reactivation_count: u32,
    #[serde(default = "default_source_branch")]
    pub source_branch: String,

    pub queue_id: Option<String>,
    /// Additional context: user_language, project_language, …
    pub task_context: Option<HashMap<String, String>>,
}

fn default_task_type() -> TaskType {
    TaskType::Feature
}

fn default_priority() -> TaskPriority {
    TaskPriority::Medium
}

fn default_source_branch() -> String {
    "main".to_string()
}

impl TaskRequest {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: String::new(),
            task_type: TaskType::Feature,
            priority: TaskPriority::Medium,
            repository_url: None,
            branch_name: None,
            base_branch: None,
            acceptance_criteria: None,
            technical_context: None,
            files_to_modify: None,
            estimated_complexity: None,
            monday_item_id: None,
            board_id: None,
            task_db_id: None,
            run_id: None,
            creator_name: None,
            creator_id: None,
            is_reactivation: false,
            reactivation_context: None,
            reactivation_count: 0,
            source_branch: default_source_branch(),
            queue_id: None,
            task_context: None,
        }
    }

    /// Language the requester writes in, defaulting to English.
    pub fn user_language(&self) -> String {
        self.task_context
            .as_ref()
            .and_then(|c| c.get("user_language").cloned())
            .unwrap_or_else(|| "en".to_string())
    }

    pub fn project_language(&self) -> String {
        self.task_context
            .as_ref()
            .and_then(|c| c.get("project_language").cloned())
            .unwrap_or_else(|| "en".to_string())
    }

    /// Canonical bytes used for byte-equal duplicate detection at admission.
    pub fn spec_bytes(&self) -> Vec<u8> {
        let spec = serde_json::json!({
            "task_id": self.task_id,
            "title": self.title,
            "description": self.description,
            "task_type": self.task_type,
            "priority": self.priority,
            "repository_url": self.repository_url,
        });
        serde_json::to_vec(&spec).unwrap_or_default()
    }
}

/// One column value in a Monday-like event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnValue {
    pub text: Option<String>,
    pub value: Option<serde_json::Value>,
    pub display_value: Option<serde_json::Value>,
    pub changed_at: Option<String>,
}

impl ColumnValue {
    /// Best-effort textual content: `text`, then `value`, then
    /// `display_value`, skipping empties.
    pub fn as_text(&self) -> Option<String> {
        if let Some(t) = &self.text {
            let t = t.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
        if let Some(serde_json::Value::String(s)) = &self.value {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
        match &self.display_value {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                Some(s.trim().to_string())
            }
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Monday sends `column_values` either as a map keyed by column id or as a
/// list of column dicts carrying their own `id`; accept both.
fn deserialize_column_values<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, ColumnValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(normalize_column_values(&raw))
}

fn normalize_column_values(raw: &serde_json::Value) -> HashMap<String, ColumnValue> {
    match raw {
        serde_json::Value::Object(map) => map
            .iter()
            .filter_map(|(id, col)| {
                let col = serde_json::from_value(col.clone()).ok()?;
                Some((id.clone(), col))
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?.to_string();
                let col = serde_json::from_value(item.clone()).ok()?;
                Some((id, col))
            })
            .collect(),
        _ => HashMap::new(),
    }
}

/// Inbound work-item envelope: a Monday-like event, optionally carrying a
/// comment (mention envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemEnvelope {
    /// External item id.
    pub external_id: i64,
    pub board_id: Option<i64>,
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_column_values")]
    pub column_values: HashMap<String, ColumnValue>,
    #[serde(default, deserialize_with = "deserialize_column_values")]
    pub previous_column_values: HashMap<String, ColumnValue>,
    #[serde(default, deserialize_with = "deserialize_column_values")]
    pub new_column_values: HashMap<String, ColumnValue>,
    pub user_id: Option<i64>,
    pub triggered_at: Option<DateTime<Utc>>,
    /// Present on mention envelopes only.
    pub update_id: Option<String>,
    /// Raw comment body for mention envelopes.
    pub text_body: Option<String>,
}

impl WorkItemEnvelope {
    pub fn new(external_id: i64) -> Self {
        Self {
            external_id,
            board_id: None,
            title: None,
            column_values: HashMap::new(),
            previous_column_values: HashMap::new(),
            new_column_values: HashMap::new(),
            user_id: None,
            triggered_at: None,
            update_id: None,
            text_body: None,
        }
    }

    fn column_text(&self, id: &str) -> Option<String> {
        self.column_values.get(id).and_then(|c| c.as_text())
    }

    /// Build a task request from the envelope's columns. Missing columns
    /// fall back to sensible defaults; `files_to_modify` is comma-split.
    pub fn to_task_request(&self) -> TaskRequest {
        let mut request = TaskRequest::new(
            self.external_id.to_string(),
            self.title.clone().unwrap_or_default(),
        );
        request.monday_item_id = Some(self.external_id);
        request.board_id = self.board_id;
        request.description = self.column_text("description").unwrap_or_default();
        request.task_type = self
            .column_text("task_type")
            .map(|t| TaskType::parse_lenient(&t))
            .unwrap_or(TaskType::Feature);
        request.priority = self
            .column_text("priority")
            .map(|p| TaskPriority::parse_lenient(&p))
            .unwrap_or(TaskPriority::Medium);
        request.repository_url = self.column_text("repository_url");
        request.branch_name = self.column_text("branch_name");
        request.acceptance_criteria = self.column_text("acceptance_criteria");
        request.technical_context = self.column_text("technical_context");
        request.estimated_complexity = self.column_text("estimated_complexity");
        if let Some(files) = self.column_text("files_to_modify") {
            let files: Vec<String> = files
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
            if !files.is_empty() {
                request.files_to_modify = Some(files);
            }
        }
        request
    }

    /// Old/new status column texts, when the event is a status transition.
    pub fn status_transition(&self) -> Option<(String, String)> {
        let old = self
            .previous_column_values
            .get("status")
            .and_then(|c| c.as_text())?;
        let new = self
            .new_column_values
            .get("status")
            .and_then(|c| c.as_text())?;
        Some((old, new))
    }
}

/// Result of one test execution inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub success: bool,
    pub test_type: String,
    #[serde(default)]
    pub total_tests: u32,
    #[serde(default)]
    pub passed_tests: u32,
    #[serde(default)]
    pub failed_tests: u32,
    #[serde(default)]
    pub skipped_tests: u32,
    pub coverage_percentage: Option<f64>,
    #[serde(default)]
    pub output: String,
    pub error: Option<String>,
    #[serde(default)]
    pub no_tests_found: bool,
    #[serde(default)]
    pub duration_seconds: f64,
}

impl TestReport {
    pub fn no_tests(test_type: impl Into<String>) -> Self {
        Self {
            success: true,
            test_type: test_type.into(),
            total_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            skipped_tests: 0,
            coverage_percentage: None,
            output: String::new(),
            error: None,
            no_tests_found: true,
            duration_seconds: 0.0,
        }
    }
}

/// Pull request descriptor as exposed to the graph and validations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: i64,
    pub title: String,
    pub url: String,
    pub branch: String,
    pub base_branch: String,
    pub status: String,
    pub head_sha: Option<String>,
    pub created_at: DateTime<Utc>,
}

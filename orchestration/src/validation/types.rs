//! Human validation aggregates: request, response, action.
//!
//! The three records are joined by `validation_id`; no object pointers cross
//! aggregate boundaries. Serialized JSON blobs (`generated_code`,
//! `test_results`, `pr_info`) are normalized at construction so the store
//! only ever sees strings, and `files_modified` is always a list of
//! non-empty strings regardless of what shape the upstream node produced.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a validation request or response.
///
/// Responses are restricted to the closed subset {approved, rejected,
/// expired, cancelled}; `pending` is a request-only state and legacy
/// spellings like "approve" are rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
    Abandoned,
    Expired,
    Cancelled,
}

impl ValidationStatus {
    /// Whether this value is allowed on a response row.
    pub fn valid_for_response(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Expired | Self::Cancelled
        )
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Abandoned => "abandoned",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Normalize an upstream `files_modified` value into a list of non-empty
/// strings. Mappings keyed by path contribute their keys; a lone string is
/// wrapped; null becomes empty.
pub fn normalize_files_modified(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::Object(map) => map.keys().filter(|k| !k.is_empty()).cloned().collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Normalize generated code into a JSON string for storage: objects are
/// serialized, valid JSON strings pass through, raw text gets wrapped.
pub fn normalize_json_blob(value: Option<&Value>, fallback_summary: &str) -> String {
    match value {
        None => serde_json::json!({ "summary": fallback_summary }).to_string(),
        Some(Value::String(s)) => {
            if serde_json::from_str::<Value>(s).is_ok() {
                s.clone()
            } else {
                serde_json::json!({ "summary": s }).to_string()
            }
        }
        Some(other) => other.to_string(),
    }
}

/// A human-approval ticket for one run's generated changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub validation_id: String,
    pub task_id: i64,
    pub run_id: Option<i64>,
    pub step_id: Option<i64>,
    pub workflow_id: String,
    /// Kind of validation; paired with `run_id` for idempotence.
    pub validation_type: String,
    pub task_title: String,
    pub original_request: String,
    pub code_summary: String,
    /// Serialized JSON (path → content or summary object).
    pub generated_code: String,
    pub files_modified: Vec<String>,
    /// Serialized JSON test summary, if tests ran.
    pub test_results: Option<String>,
    /// Serialized JSON PR descriptor, if a PR exists.
    pub pr_info: Option<String>,
    pub status: ValidationStatus,
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ValidationRequest {
    /// Build a request with normalized blobs and a 24-hour expiry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validation_id: impl Into<String>,
        task_id: i64,
        workflow_id: impl Into<String>,
        task_title: impl Into<String>,
        original_request: impl Into<String>,
        code_summary: impl Into<String>,
        generated_code: Option<&Value>,
        files_modified: &Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            validation_id: validation_id.into(),
            task_id,
            run_id: None,
            step_id: None,
            workflow_id: workflow_id.into(),
            validation_type: "code_review".to_string(),
            task_title: task_title.into(),
            original_request: original_request.into(),
            code_summary: code_summary.into(),
            generated_code: normalize_json_blob(
                generated_code,
                "Code généré - voir fichiers modifiés",
            ),
            files_modified: normalize_files_modified(files_modified),
            test_results: None,
            pr_info: None,
            status: ValidationStatus::Pending,
            requested_by: None,
            created_at: now,
            expires_at: now + Duration::hours(24),
        }
    }

    pub fn with_run(mut self, run_id: Option<i64>, step_id: Option<i64>) -> Self {
        self.run_id = run_id;
        self.step_id = step_id;
        self
    }

    pub fn with_test_results(mut self, test_results: Option<&Value>) -> Self {
        self.test_results = test_results.map(|v| normalize_json_blob(Some(v), ""));
        self
    }

    pub fn with_pr_info(mut self, pr_info: Option<&Value>) -> Self {
        self.pr_info = pr_info.map(|v| normalize_json_blob(Some(v), ""));
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A human's decision on a validation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub validation_id: String,
    pub status: ValidationStatus,
    pub comments: Option<String>,
    pub validated_by: Option<String>,
    pub validated_at: DateTime<Utc>,
    pub should_merge: bool,
    pub should_continue_workflow: bool,
    /// Rejection count across retries for the same validation (0..3).
    pub rejection_count: u32,
    pub modification_instructions: Option<String>,
    pub should_retry_workflow: bool,
    /// Filled in by the store at submission time.
    pub validation_duration_seconds: Option<i64>,
}

impl ValidationResponse {
    pub fn approved(validation_id: impl Into<String>) -> Self {
        Self {
            validation_id: validation_id.into(),
            status: ValidationStatus::Approved,
            comments: None,
            validated_by: None,
            validated_at: Utc::now(),
            should_merge: true,
            should_continue_workflow: true,
            rejection_count: 0,
            modification_instructions: None,
            should_retry_workflow: false,
            validation_duration_seconds: None,
        }
    }

    pub fn rejected(validation_id: impl Into<String>) -> Self {
        Self {
            validation_id: validation_id.into(),
            status: ValidationStatus::Rejected,
            comments: None,
            validated_by: None,
            validated_at: Utc::now(),
            should_merge: false,
            should_continue_workflow: true,
            rejection_count: 1,
            modification_instructions: None,
            should_retry_workflow: false,
            validation_duration_seconds: None,
        }
    }
}

/// Side-effect performed after a validation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    MergePr,
    RejectPr,
    UpdateMonday,
    CleanupBranch,
    NotifyUser,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MergePr => "merge_pr",
            Self::RejectPr => "reject_pr",
            Self::UpdateMonday => "update_monday",
            Self::CleanupBranch => "cleanup_branch",
            Self::NotifyUser => "notify_user",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Post-decision side-effect record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAction {
    pub action_id: i64,
    pub validation_id: String,
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub input: Option<Value>,
    pub result: Option<Value>,
    pub merge_commit_hash: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Listing row for the pending-validations view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub validation_id: String,
    pub task_title: String,
    pub status: ValidationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub files_count: usize,
    pub pr_url: Option<String>,
    /// Expires within the next hour.
    pub is_urgent: bool,
    pub has_test_failures: bool,
}

/// Aggregate statistics over all validations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_validations: u64,
    pub pending_validations: u64,
    pub approved_validations: u64,
    pub rejected_validations: u64,
    pub expired_validations: u64,
    pub avg_validation_time_minutes: f64,
    pub urgent_validations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_files_modified_from_list() {
        let files = normalize_files_modified(&json!(["a.rs", "", "b.rs"]));
        assert_eq!(files, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_files_modified_from_map_takes_keys() {
        let files = normalize_files_modified(&json!({"src/main.rs": "content", "lib.rs": "x"}));
        assert_eq!(files.len(), 2);
        assert!(files.contains(&"src/main.rs".to_string()));
        assert!(files.contains(&"lib.rs".to_string()));
    }

    #[test]
    fn test_files_modified_from_string_and_null() {
        assert_eq!(
            normalize_files_modified(&json!("only.txt")),
            vec!["only.txt"]
        );
        assert!(normalize_files_modified(&json!(null)).is_empty());
        assert!(normalize_files_modified(&json!("")).is_empty());
    }

    #[test]
    fn test_generated_code_normalization() {
        // Object → serialized
        let blob = normalize_json_blob(Some(&json!({"main.txt": "hello"})), "fallback");
        assert!(serde_json::from_str::<Value>(&blob).unwrap().is_object());

        // Valid JSON string passes through
        let blob = normalize_json_blob(Some(&json!("{\"a\": 1}")), "fallback");
        assert_eq!(blob, "{\"a\": 1}");

        // Raw text gets wrapped
        let blob = normalize_json_blob(Some(&json!("not json at all")), "fallback");
        let parsed: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(parsed["summary"], "not json at all");

        // None produces the fallback summary
        let blob = normalize_json_blob(None, "nothing here");
        let parsed: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(parsed["summary"], "nothing here");
    }

    #[test]
    fn test_response_status_domain() {
        assert!(ValidationStatus::Approved.valid_for_response());
        assert!(ValidationStatus::Rejected.valid_for_response());
        assert!(ValidationStatus::Expired.valid_for_response());
        assert!(ValidationStatus::Cancelled.valid_for_response());
        assert!(!ValidationStatus::Pending.valid_for_response());
        assert!(!ValidationStatus::Abandoned.valid_for_response());
    }

    #[test]
    fn test_legacy_approve_spelling_rejected() {
        assert!(serde_json::from_str::<ValidationStatus>("\"approve\"").is_err());
        assert!(serde_json::from_str::<ValidationStatus>("\"approved\"").is_ok());
    }

    #[test]
    fn test_request_expiry_defaults_to_24h() {
        let request = ValidationRequest::new(
            "v-1",
            1,
            "wf-1",
            "title",
            "do the thing",
            "summary",
            None,
            &json!(["a.rs"]),
        );
        let delta = request.expires_at - request.created_at;
        assert_eq!(delta.num_hours(), 24);
        assert!(!request.is_expired(request.created_at));
        assert!(request.is_expired(request.expires_at + Duration::seconds(1)));
    }
}

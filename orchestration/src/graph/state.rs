//! Workflow state threaded through the graph.
//!
//! `Results` is a reducer container: a handful of channels have accumulator
//! semantics (`ai_messages`, `error_logs`, `test_results` append;
//! `modified_files` is a set union) and everything else is last-wins.
//! Nodes mutate through the typed API, which enforces those semantics; the
//! same reducers apply when merging a recovered checkpoint delta.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::model::{TaskRequest, TestReport, WorkflowStatus};

/// Keys with extend semantics on merge.
const APPEND_KEYS: &[&str] = &["ai_messages", "error_logs", "test_results"];

/// Keys with set-union semantics on merge.
const UNION_KEYS: &[&str] = &["modified_files"];

/// The `results` channel map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Results {
    #[serde(flatten)]
    map: Map<String, Value>,
}

impl Results {
    pub fn new() -> Self {
        let mut results = Self::default();
        results.map.insert("ai_messages".into(), Value::Array(vec![]));
        results.map.insert("error_logs".into(), Value::Array(vec![]));
        results
            .map
            .insert("modified_files".into(), Value::Array(vec![]));
        results
            .map
            .insert("test_results".into(), Value::Array(vec![]));
        results.map.insert("debug_attempts".into(), Value::from(0));
        results
            .map
            .insert("human_debug_attempts".into(), Value::from(0));
        results
    }

    // -- generic access ------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Last-wins write for scalar channels.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.map.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.map.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_u32(&self, key: &str) -> u32 {
        self.map
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.map
    }

    // -- accumulator channels ------------------------------------------------

    fn push_to(&mut self, key: &str, value: Value) {
        match self.map.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.map.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    fn string_items(&self, key: &str) -> Vec<String> {
        self.map
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn push_ai_message(&mut self, message: impl Into<String>) {
        self.push_to("ai_messages", Value::String(message.into()));
    }

    pub fn ai_messages(&self) -> Vec<String> {
        self.string_items("ai_messages")
    }

    pub fn push_error_log(&mut self, message: impl Into<String>) {
        self.push_to("error_logs", Value::String(message.into()));
    }

    pub fn error_logs(&self) -> Vec<String> {
        self.string_items("error_logs")
    }

    /// Union new paths into `modified_files`, preserving first-seen order
    /// and dropping empties.
    pub fn add_modified_files<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.string_items("modified_files");
        for file in files {
            let file = file.into();
            if !file.is_empty() && !current.contains(&file) {
                current.push(file);
            }
        }
        self.map.insert(
            "modified_files".into(),
            Value::Array(current.into_iter().map(Value::String).collect()),
        );
    }

    pub fn modified_files(&self) -> Vec<String> {
        self.string_items("modified_files")
    }

    pub fn push_test_report(&mut self, report: &TestReport) {
        if let Ok(value) = serde_json::to_value(report) {
            self.push_to("test_results", value);
        }
    }

    pub fn test_reports(&self) -> Vec<TestReport> {
        self.map
            .get("test_results")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn last_test_report(&self) -> Option<TestReport> {
        self.test_reports().into_iter().last()
    }

    // -- counters ------------------------------------------------------------

    pub fn debug_attempts(&self) -> u32 {
        self.get_u32("debug_attempts")
    }

    pub fn increment_debug_attempts(&mut self) -> u32 {
        let next = self.debug_attempts() + 1;
        self.set("debug_attempts", next);
        next
    }

    pub fn human_debug_attempts(&self) -> u32 {
        self.get_u32("human_debug_attempts")
    }

    pub fn increment_human_debug_attempts(&mut self) -> u32 {
        let next = self.human_debug_attempts() + 1;
        self.set("human_debug_attempts", next);
        next
    }

    // -- merge ---------------------------------------------------------------

    /// Merge a delta produced elsewhere (checkpoint recovery, node retry).
    /// Accumulator keys extend/union; everything else is last-wins.
    pub fn merge(&mut self, delta: &Map<String, Value>) {
        for (key, value) in delta {
            if APPEND_KEYS.contains(&key.as_str()) {
                if let Value::Array(items) = value {
                    for item in items {
                        self.push_to(key, item.clone());
                    }
                    continue;
                }
            }
            if UNION_KEYS.contains(&key.as_str()) {
                if let Value::Array(items) = value {
                    let files: Vec<String> = items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect();
                    self.add_modified_files(files);
                    continue;
                }
            }
            self.map.insert(key.clone(), value.clone());
        }
    }
}

/// The in-memory payload passed through every node of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_node: Option<String>,
    /// Ordered, deduplicated: a retried node supersedes its first entry.
    pub completed_nodes: Vec<String>,
    pub task: TaskRequest,
    pub results: Results,
    pub error: Option<String>,

    pub db_task_id: Option<i64>,
    pub db_run_id: Option<i64>,
    pub current_step_id: Option<i64>,
    pub uuid_run_id: Option<String>,
    pub queue_id: Option<String>,

    pub is_reactivation: bool,
    pub reactivation_count: u32,
    pub source_branch: String,
    pub reactivation_context: Option<String>,

    pub user_language: String,
    pub project_language: String,

    pub node_retry_count: HashMap<String, u32>,
    pub recovery_mode: bool,
    pub checkpoint_data: Map<String, Value>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(
        task: TaskRequest,
        workflow_id: impl Into<String>,
        db_task_id: Option<i64>,
        db_run_id: Option<i64>,
        uuid_run_id: Option<String>,
    ) -> Self {
        let mut results = Results::new();
        if let Some(queue_id) = &task.queue_id {
            results.set("queue_id", queue_id.clone());
        }
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Pending,
            current_node: None,
            completed_nodes: Vec::new(),
            user_language: task.user_language(),
            project_language: task.project_language(),
            is_reactivation: task.is_reactivation,
            reactivation_count: task.reactivation_count,
            source_branch: task.source_branch.clone(),
            reactivation_context: task.reactivation_context.clone(),
            queue_id: task.queue_id.clone(),
            task,
            results,
            error: None,
            db_task_id,
            db_run_id,
            current_step_id: None,
            uuid_run_id,
            node_retry_count: HashMap::new(),
            recovery_mode: false,
            checkpoint_data: Map::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record a node completion. A second appearance of the same node (a
    /// retry, a revisit through a loop edge) supersedes the first: the node
    /// moves to the end of the order.
    pub fn mark_node_completed(&mut self, node: &str) {
        self.completed_nodes.retain(|n| n != node);
        self.completed_nodes.push(node.to_string());
    }

    pub fn is_node_completed(&self, node: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node)
    }

    pub fn retry_count(&self, node: &str) -> u32 {
        self.node_retry_count.get(node).copied().unwrap_or(0)
    }

    pub fn bump_retry_count(&mut self, node: &str) -> u32 {
        let count = self.node_retry_count.entry(node.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Working directory assigned by the prepare node.
    pub fn working_directory(&self) -> Option<&str> {
        self.results.get_str("working_directory")
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.results.get_str("branch_name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> WorkflowState {
        WorkflowState::new(
            TaskRequest::new("1", "Test"),
            "wf-1",
            Some(1),
            Some(1),
            Some("run-uuid".to_string()),
        )
    }

    #[test]
    fn test_accumulators_preserve_order() {
        let mut s = state();
        s.results.push_ai_message("first");
        s.results.push_ai_message("second");
        s.results.push_error_log("boom");

        assert_eq!(s.results.ai_messages(), vec!["first", "second"]);
        assert_eq!(s.results.error_logs(), vec!["boom"]);
    }

    #[test]
    fn test_modified_files_union() {
        let mut s = state();
        s.results.add_modified_files(["a.rs", "b.rs"]);
        s.results.add_modified_files(["b.rs", "c.rs", ""]);
        assert_eq!(s.results.modified_files(), vec!["a.rs", "b.rs", "c.rs"]);
    }

    #[test]
    fn test_scalar_last_wins() {
        let mut s = state();
        s.results.set("should_merge", false);
        s.results.set("should_merge", true);
        assert!(s.results.get_bool("should_merge"));
    }

    #[test]
    fn test_merge_reducers() {
        let mut s = state();
        s.results.push_ai_message("kept");
        s.results.add_modified_files(["a.rs"]);
        s.results.set("qa_score", 40);

        let mut delta = Map::new();
        delta.insert("ai_messages".into(), json!(["incoming"]));
        delta.insert("modified_files".into(), json!(["a.rs", "b.rs"]));
        delta.insert("qa_score".into(), json!(80));
        s.results.merge(&delta);

        assert_eq!(s.results.ai_messages(), vec!["kept", "incoming"]);
        assert_eq!(s.results.modified_files(), vec!["a.rs", "b.rs"]);
        assert_eq!(s.results.get_u32("qa_score"), 80);
    }

    #[test]
    fn test_test_reports_append_in_order() {
        let mut s = state();
        let mut failing = TestReport::no_tests("cargo");
        failing.success = false;
        failing.total_tests = 5;
        failing.failed_tests = 2;
        failing.no_tests_found = false;
        s.results.push_test_report(&failing);

        let mut passing = failing.clone();
        passing.success = true;
        passing.failed_tests = 0;
        s.results.push_test_report(&passing);

        let reports = s.results.test_reports();
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].success);
        assert!(reports[1].success);
        assert!(s.results.last_test_report().unwrap().success);
    }

    #[test]
    fn test_completed_nodes_dedup_supersede() {
        let mut s = state();
        s.mark_node_completed("run_tests");
        s.mark_node_completed("debug_code");
        s.mark_node_completed("run_tests");

        assert_eq!(s.completed_nodes, vec!["debug_code", "run_tests"]);
    }

    #[test]
    fn test_debug_counters_are_independent() {
        let mut s = state();
        s.results.increment_debug_attempts();
        s.results.increment_debug_attempts();
        s.results.increment_human_debug_attempts();

        assert_eq!(s.results.debug_attempts(), 2);
        assert_eq!(s.results.human_debug_attempts(), 1);
    }

    #[test]
    fn test_state_snapshot_roundtrip() {
        let mut s = state();
        s.results.push_ai_message("msg");
        s.results.add_modified_files(["main.txt"]);
        s.mark_node_completed("prepare_environment");

        let json = serde_json::to_string(&s).unwrap();
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.results.ai_messages(), vec!["msg"]);
        assert_eq!(restored.completed_nodes, vec!["prepare_environment"]);
        assert_eq!(restored.db_run_id, Some(1));
    }
}

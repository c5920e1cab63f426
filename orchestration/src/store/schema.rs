//! Column family definitions for the persistence store.
//!
//! One column family per aggregate, sharing a single RocksDB instance.
//! Keys zero-pad numeric components so lexicographic iteration matches
//! id/order sequence.

/// Tasks, keyed by internal task id.
pub const CF_TASKS: &str = "tasks";

/// External-id → task-id index (idempotent task creation).
pub const CF_TASKS_BY_EXTERNAL: &str = "tasks_by_external";

/// Runs, keyed by run id.
pub const CF_RUNS: &str = "runs";

/// Steps, keyed by step id; ordered per run via `step_order`.
pub const CF_STEPS: &str = "steps";

/// Per-prompt LLM interactions, keyed by interaction id.
pub const CF_LLM_INTERACTIONS: &str = "llm_interactions";

/// Code-generation artifacts per run.
pub const CF_CODE_GENERATIONS: &str = "code_generations";

/// Test results per run.
pub const CF_TEST_RESULTS: &str = "test_results";

/// Pull requests, keyed by run id.
pub const CF_PULL_REQUESTS: &str = "pull_requests";

/// Human validation requests.
pub const CF_VALIDATIONS: &str = "validations";

/// Responses attached to validation requests.
pub const CF_VALIDATION_RESPONSES: &str = "validation_responses";

/// Post-decision validation actions.
pub const CF_VALIDATION_ACTIONS: &str = "validation_actions";

/// Monday comments that spawned runs.
pub const CF_UPDATE_TRIGGERS: &str = "update_triggers";

/// Node checkpoints per run.
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Application event log (stored as JSON for debuggability).
pub const CF_APP_EVENTS: &str = "app_events";

/// Key/value configuration entries with type tags.
pub const CF_CONFIG: &str = "config";

/// Monotonic id counters.
pub const CF_COUNTERS: &str = "counters";

/// All column family names, in open order.
pub const ALL_CFS: &[&str] = &[
    CF_TASKS,
    CF_TASKS_BY_EXTERNAL,
    CF_RUNS,
    CF_STEPS,
    CF_LLM_INTERACTIONS,
    CF_CODE_GENERATIONS,
    CF_TEST_RESULTS,
    CF_PULL_REQUESTS,
    CF_VALIDATIONS,
    CF_VALIDATION_RESPONSES,
    CF_VALIDATION_ACTIONS,
    CF_UPDATE_TRIGGERS,
    CF_CHECKPOINTS,
    CF_APP_EVENTS,
    CF_CONFIG,
    CF_COUNTERS,
];

/// Key builders for compound keys.
pub mod keys {
    pub fn task(task_id: i64) -> String {
        format!("task:{:020}", task_id)
    }

    pub fn task_by_external(external_id: i64) -> String {
        format!("ext:{:020}", external_id)
    }

    pub fn run(run_id: i64) -> String {
        format!("run:{:020}", run_id)
    }

    pub fn step(step_id: i64) -> String {
        format!("step:{:020}", step_id)
    }

    pub fn llm_interaction(interaction_id: i64) -> String {
        format!("llm:{:020}", interaction_id)
    }

    pub fn code_generation(generation_id: i64) -> String {
        format!("gen:{:020}", generation_id)
    }

    pub fn test_result(result_id: i64) -> String {
        format!("test:{:020}", result_id)
    }

    pub fn pull_request(run_id: i64) -> String {
        format!("pr:{:020}", run_id)
    }

    pub fn validation(validation_id: &str) -> String {
        format!("val:{}", validation_id)
    }

    pub fn validation_response(validation_id: &str) -> String {
        format!("valresp:{}", validation_id)
    }

    pub fn validation_action(validation_id: &str, action_id: i64) -> String {
        format!("valact:{}:{:020}", validation_id, action_id)
    }

    pub fn validation_action_prefix(validation_id: &str) -> String {
        format!("valact:{}:", validation_id)
    }

    pub fn update_trigger(trigger_id: i64) -> String {
        format!("trig:{:020}", trigger_id)
    }

    pub fn checkpoint(run_id: i64, node_name: &str) -> String {
        format!("ckpt:{:020}:{}", run_id, node_name)
    }

    pub fn checkpoint_prefix(run_id: i64) -> String {
        format!("ckpt:{:020}:", run_id)
    }

    /// Event key ordered by timestamp.
    pub fn app_event(timestamp_nanos: i64, event_id: &str) -> String {
        format!("evt:{:020}:{}", timestamp_nanos, event_id)
    }

    pub fn config(key: &str) -> String {
        format!("cfg:{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::task(7), format!("task:{:020}", 7));
        assert_eq!(keys::validation("v-1"), "val:v-1");
        assert!(keys::checkpoint(3, "run_tests").starts_with(&keys::checkpoint_prefix(3)));
    }

    #[test]
    fn test_id_key_ordering() {
        assert!(keys::step(9) < keys::step(10));
        assert!(keys::run(99) < keys::run(100));
    }

    #[test]
    fn test_event_key_ordering() {
        assert!(keys::app_event(1_000, "a") < keys::app_event(2_000, "a"));
    }
}

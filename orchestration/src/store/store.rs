//! RocksDB-backed persistence store.
//!
//! Single process-wide instance, lazily shared behind an `Arc`. Values are
//! bincode; the application event log stays JSON for debuggability.
//! Transient failures are retried with exponential backoff (0.2 s doubling
//! to 3.2 s, five attempts); everything else propagates. Multi-row writes
//! go through one `WriteBatch` so a step and its interactions, or a
//! validation response and its parent-status sync, land atomically.

use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::schema::{self, ALL_CFS};
use super::types::*;
use crate::error::{StoreError, StoreResult};
use crate::model::{TaskStatus, WorkItemEnvelope, WorkflowStatus};

/// Base delay for transient-failure retries.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Maximum retry attempts for transient failures.
const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Shared reference to the persistence store.
pub type SharedStore = std::sync::Arc<PersistenceStore>;

/// Parameters for opening a run.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub workflow_id: String,
    /// Process-generated correlation id.
    pub correlation_id: String,
    /// Reuse a pre-created run row instead of inserting a new one.
    pub precreated_run_id: Option<i64>,
    pub ai_provider: Option<String>,
    pub reactivation_count: u32,
    pub source_branch: String,
    pub triggered_by: Option<String>,
}

/// RocksDB-backed store for tasks, runs, steps and their satellite rows.
pub struct PersistenceStore {
    db: RwLock<DB>,
    path: PathBuf,
    /// Serializes counter increments.
    id_lock: Mutex<()>,
}

impl PersistenceStore {
    /// Open or create the store at the given path.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;
        info!(path = %path.display(), "Persistence store opened");

        Ok(Self {
            db: RwLock::new(db),
            path,
            id_lock: Mutex::new(()),
        })
    }

    pub fn shared(self) -> SharedStore {
        std::sync::Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    pub(crate) fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let bytes =
            bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// List all values in a column family whose key starts with `prefix`.
    pub(crate) fn list<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        let iter = db.iterator_cf(
            &cf,
            IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward),
        );
        for result in iter {
            let (key, bytes) = result?;
            let key_str = String::from_utf8_lossy(&key);
            if !key_str.starts_with(prefix) {
                break;
            }
            let value = bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            values.push(value);
        }
        Ok(values)
    }

    /// Apply several (cf, key, serialized value) writes in one batch.
    pub(crate) fn write_pairs(&self, writes: &[(&str, String, Vec<u8>)]) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut batch = WriteBatch::default();
        for (cf_name, key, bytes) in writes {
            let cf = db
                .cf_handle(cf_name)
                .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
            batch.put_cf(&cf, key.as_bytes(), bytes);
        }
        db.write(batch)?;
        Ok(())
    }

    pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Allocate the next id from a named counter.
    pub(crate) fn next_id(&self, counter: &str) -> StoreResult<i64> {
        let _guard = self.id_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let key = format!("ctr:{}", counter);
        let current: i64 = self.get(schema::CF_COUNTERS, &key)?.unwrap_or(0);
        let next = current + 1;
        self.put(schema::CF_COUNTERS, &key, &next)?;
        Ok(next)
    }

    /// Retry a store operation on transient failures with exponential
    /// backoff: 0.2, 0.4, 0.8, 1.6, 3.2 seconds, then give up.
    pub(crate) fn with_retry<T, F>(&self, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> StoreResult<T>,
    {
        let mut last_err = None;
        for attempt in 0..RETRY_MAX_ATTEMPTS {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < RETRY_MAX_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * (1 << attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %e, "Transient store failure, retrying");
                    std::thread::sleep(delay);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::transient("retry budget exhausted")))
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Create a task from an external work item, or return the existing row
    /// for the same external id. Idempotent on external id.
    pub fn create_or_load_task(&self, envelope: &WorkItemEnvelope) -> StoreResult<i64> {
        let ext_key = schema::keys::task_by_external(envelope.external_id);
        if let Some(task_id) = self.get::<i64>(schema::CF_TASKS_BY_EXTERNAL, &ext_key)? {
            debug!(task_id, external_id = envelope.external_id, "Task already known");
            return Ok(task_id);
        }

        let request = envelope.to_task_request();
        let task_id = self.next_id("tasks")?;
        let now = Utc::now();
        let record = TaskRecord {
            task_id,
            external_id: envelope.external_id,
            board_id: envelope.board_id,
            title: request.title,
            description: request.description,
            repository_url: request.repository_url,
            priority: request.priority,
            task_type: request.task_type,
            internal_status: TaskStatus::Pending,
            external_status: envelope
                .new_column_values
                .get("status")
                .and_then(|c| c.as_text()),
            creator_name: request.creator_name,
            creator_id: envelope.user_id,
            last_merged_pr_url: None,
            created_at: now,
            updated_at: now,
        };

        self.write_pairs(&[
            (
                schema::CF_TASKS,
                schema::keys::task(task_id),
                Self::encode(&record)?,
            ),
            (
                schema::CF_TASKS_BY_EXTERNAL,
                ext_key,
                Self::encode(&task_id)?,
            ),
        ])?;
        info!(task_id, external_id = envelope.external_id, "Task created");
        Ok(task_id)
    }

    pub fn get_task(&self, task_id: i64) -> StoreResult<Option<TaskRecord>> {
        self.get(schema::CF_TASKS, &schema::keys::task(task_id))
    }

    pub fn find_task_by_external(&self, external_id: i64) -> StoreResult<Option<i64>> {
        self.get(
            schema::CF_TASKS_BY_EXTERNAL,
            &schema::keys::task_by_external(external_id),
        )
    }

    pub fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        external_status: Option<&str>,
    ) -> StoreResult<()> {
        let mut record = self
            .get_task(task_id)?
            .ok_or_else(|| StoreError::not_found(format!("task {}", task_id)))?;
        record.internal_status = status;
        if let Some(ext) = external_status {
            record.external_status = Some(ext.to_string());
        }
        record.updated_at = Utc::now();
        self.put(schema::CF_TASKS, &schema::keys::task(task_id), &record)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Open a run for a task. When `precreated_run_id` is set the existing
    /// row (created by an update trigger) is promoted to running instead of
    /// inserting a new one.
    pub fn start_run(&self, task_id: i64, params: RunParams) -> StoreResult<i64> {
        if let Some(run_id) = params.precreated_run_id {
            if let Some(mut existing) = self.get_run(run_id)? {
                existing.workflow_id = params.workflow_id.clone();
                existing.uuid_run_id = params.correlation_id.clone();
                existing.status = WorkflowStatus::Running;
                existing.started_at = Utc::now();
                existing.source_branch = params.source_branch.clone();
                existing.reactivation_count = params.reactivation_count;
                self.put(schema::CF_RUNS, &schema::keys::run(run_id), &existing)?;
                info!(run_id, task_id, "Pre-created run promoted to running");
                return Ok(run_id);
            }
            warn!(
                run_id,
                "Pre-created run not found, inserting a fresh run row"
            );
        }

        let run_id = self.next_id("runs")?;
        let record = RunRecord {
            run_id,
            uuid_run_id: params.correlation_id,
            task_id,
            workflow_id: params.workflow_id,
            ai_provider: params.ai_provider,
            reactivation_count: params.reactivation_count,
            source_branch: params.source_branch,
            started_at: Utc::now(),
            completed_at: None,
            status: WorkflowStatus::Running,
            metrics: None,
            error: None,
            triggered_by: params.triggered_by,
        };
        self.put(schema::CF_RUNS, &schema::keys::run(run_id), &record)?;
        info!(run_id, task_id, "Run started");
        Ok(run_id)
    }

    /// Insert a pending run row ahead of worker dispatch, so the spawning
    /// update can reference it.
    pub fn create_pending_run(
        &self,
        task_id: i64,
        triggered_by: Option<&str>,
        reactivation_count: u32,
    ) -> StoreResult<i64> {
        let run_id = self.next_id("runs")?;
        let record = RunRecord {
            run_id,
            uuid_run_id: String::new(),
            task_id,
            workflow_id: String::new(),
            ai_provider: None,
            reactivation_count,
            source_branch: "main".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: WorkflowStatus::Pending,
            metrics: None,
            error: None,
            triggered_by: triggered_by.map(String::from),
        };
        self.put(schema::CF_RUNS, &schema::keys::run(run_id), &record)?;
        Ok(run_id)
    }

    pub fn get_run(&self, run_id: i64) -> StoreResult<Option<RunRecord>> {
        self.get(schema::CF_RUNS, &schema::keys::run(run_id))
    }

    /// Runs left non-terminal by a previous process (crash recovery scan).
    pub fn list_incomplete_runs(&self) -> StoreResult<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .list::<RunRecord>(schema::CF_RUNS, "run:")?
            .into_iter()
            .filter(|r| {
                matches!(r.status, WorkflowStatus::Running)
                    && r.completed_at.is_none()
                    && !r.workflow_id.is_empty()
            })
            .collect();
        runs.sort_by_key(|r| r.run_id);
        Ok(runs)
    }

    pub fn list_runs_for_task(&self, task_id: i64) -> StoreResult<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .list::<RunRecord>(schema::CF_RUNS, "run:")?
            .into_iter()
            .filter(|r| r.task_id == task_id)
            .collect();
        runs.sort_by_key(|r| r.run_id);
        Ok(runs)
    }

    /// Write the final run record: status, metrics blob, error.
    pub fn complete_task_run(
        &self,
        run_id: i64,
        status: WorkflowStatus,
        metrics: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut record = self
            .get_run(run_id)?
            .ok_or_else(|| StoreError::not_found(format!("run {}", run_id)))?;
        record.status = status;
        record.completed_at = Some(Utc::now());
        if metrics.is_some() {
            record.metrics = metrics;
        }
        record.error = error.map(String::from);
        self.put(schema::CF_RUNS, &schema::keys::run(run_id), &record)?;
        info!(run_id, %status, "Run completed");
        Ok(())
    }

    // =========================================================================
    // Steps
    // =========================================================================

    pub fn create_step(
        &self,
        run_id: i64,
        node_name: &str,
        step_order: u32,
        input: Option<serde_json::Value>,
    ) -> StoreResult<i64> {
        let step_id = self.next_id("steps")?;
        let record = StepRecord {
            step_id,
            run_id,
            node_name: node_name.to_string(),
            step_order,
            input,
            output: None,
            status: WorkflowStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            retry_count: 0,
            error: None,
        };
        self.put(schema::CF_STEPS, &schema::keys::step(step_id), &record)?;
        Ok(step_id)
    }

    pub fn complete_step(
        &self,
        step_id: i64,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut record = self
            .get::<StepRecord>(schema::CF_STEPS, &schema::keys::step(step_id))?
            .ok_or_else(|| StoreError::not_found(format!("step {}", step_id)))?;
        record.status = status;
        record.output = output;
        record.error = error.map(String::from);
        record.completed_at = Some(Utc::now());
        self.put(schema::CF_STEPS, &schema::keys::step(step_id), &record)
    }

    pub fn bump_step_retry(&self, step_id: i64) -> StoreResult<u32> {
        let mut record = self
            .get::<StepRecord>(schema::CF_STEPS, &schema::keys::step(step_id))?
            .ok_or_else(|| StoreError::not_found(format!("step {}", step_id)))?;
        record.retry_count += 1;
        let count = record.retry_count;
        self.put(schema::CF_STEPS, &schema::keys::step(step_id), &record)?;
        Ok(count)
    }

    /// Steps of a run in execution order.
    pub fn list_steps(&self, run_id: i64) -> StoreResult<Vec<StepRecord>> {
        let mut steps: Vec<StepRecord> = self
            .list::<StepRecord>(schema::CF_STEPS, "step:")?
            .into_iter()
            .filter(|s| s.run_id == run_id)
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    pub fn save_checkpoint(
        &self,
        run_id: i64,
        node_name: &str,
        payload: serde_json::Value,
    ) -> StoreResult<()> {
        let record = CheckpointRecord {
            run_id,
            node_name: node_name.to_string(),
            completed_at: Utc::now(),
            payload,
        };
        self.put(
            schema::CF_CHECKPOINTS,
            &schema::keys::checkpoint(run_id, node_name),
            &record,
        )
    }

    pub fn load_checkpoints(&self, run_id: i64) -> StoreResult<Vec<CheckpointRecord>> {
        let mut checkpoints: Vec<CheckpointRecord> =
            self.list(schema::CF_CHECKPOINTS, &schema::keys::checkpoint_prefix(run_id))?;
        checkpoints.sort_by_key(|c| c.completed_at);
        Ok(checkpoints)
    }

    // =========================================================================
    // LLM interactions / code generations / test results
    // =========================================================================

    pub fn log_llm_interaction(&self, record: LlmInteractionRecord) -> StoreResult<i64> {
        let interaction_id = self.next_id("llm_interactions")?;
        let record = LlmInteractionRecord {
            interaction_id,
            ..record
        };
        self.put(
            schema::CF_LLM_INTERACTIONS,
            &schema::keys::llm_interaction(interaction_id),
            &record,
        )?;
        Ok(interaction_id)
    }

    pub fn list_llm_interactions(&self, step_id: i64) -> StoreResult<Vec<LlmInteractionRecord>> {
        let mut rows: Vec<LlmInteractionRecord> = self
            .list::<LlmInteractionRecord>(schema::CF_LLM_INTERACTIONS, "llm:")?
            .into_iter()
            .filter(|r| r.step_id == step_id)
            .collect();
        rows.sort_by_key(|r| r.interaction_id);
        Ok(rows)
    }

    pub fn log_code_generation(&self, record: CodeGenerationRecord) -> StoreResult<i64> {
        let generation_id = self.next_id("code_generations")?;
        let record = CodeGenerationRecord {
            generation_id,
            ..record
        };
        self.put(
            schema::CF_CODE_GENERATIONS,
            &schema::keys::code_generation(generation_id),
            &record,
        )?;
        Ok(generation_id)
    }

    pub fn log_test_result(&self, record: TestResultRecord) -> StoreResult<i64> {
        let result_id = self.next_id("test_results")?;
        let record = TestResultRecord {
            result_id,
            ..record
        };
        self.put(
            schema::CF_TEST_RESULTS,
            &schema::keys::test_result(result_id),
            &record,
        )?;
        Ok(result_id)
    }

    pub fn list_test_results(&self, run_id: i64) -> StoreResult<Vec<TestResultRecord>> {
        let mut rows: Vec<TestResultRecord> = self
            .list::<TestResultRecord>(schema::CF_TEST_RESULTS, "test:")?
            .into_iter()
            .filter(|r| r.run_id == run_id)
            .collect();
        rows.sort_by_key(|r| r.result_id);
        Ok(rows)
    }

    // =========================================================================
    // Pull requests
    // =========================================================================

    /// Persist the PR row for a run. Both ids are mandatory; a missing task
    /// or run id is a `MissingReference` and never written.
    #[allow(clippy::too_many_arguments)]
    pub fn create_pull_request(
        &self,
        task_id: Option<i64>,
        run_id: Option<i64>,
        number: i64,
        url: &str,
        title: &str,
        head_sha: Option<&str>,
        base_branch: &str,
        head_branch: &str,
    ) -> StoreResult<()> {
        let task_id = task_id
            .ok_or_else(|| StoreError::missing_reference("task_id is required for a PR row"))?;
        let run_id = run_id
            .ok_or_else(|| StoreError::missing_reference("run_id is required for a PR row"))?;

        let now = Utc::now();
        let record = PullRequestRecord {
            task_id,
            run_id,
            external_number: number,
            url: url.to_string(),
            title: title.to_string(),
            head_branch: head_branch.to_string(),
            base_branch: base_branch.to_string(),
            head_sha: head_sha.map(String::from),
            status: PullRequestStatus::Open,
            merge_commit_hash: None,
            created_at: now,
            updated_at: now,
        };
        self.put(
            schema::CF_PULL_REQUESTS,
            &schema::keys::pull_request(run_id),
            &record,
        )?;
        info!(task_id, run_id, number, "Pull request row persisted");
        Ok(())
    }

    pub fn get_pull_request(&self, run_id: i64) -> StoreResult<Option<PullRequestRecord>> {
        self.get(schema::CF_PULL_REQUESTS, &schema::keys::pull_request(run_id))
    }

    pub fn mark_pull_request_merged(
        &self,
        run_id: i64,
        merge_commit_hash: Option<&str>,
    ) -> StoreResult<()> {
        let mut record = self
            .get_pull_request(run_id)?
            .ok_or_else(|| StoreError::not_found(format!("pull request for run {}", run_id)))?;
        record.status = PullRequestStatus::Merged;
        record.merge_commit_hash = merge_commit_hash.map(String::from);
        record.updated_at = Utc::now();
        self.put(
            schema::CF_PULL_REQUESTS,
            &schema::keys::pull_request(run_id),
            &record,
        )
    }

    /// Mirror the last merged PR URL onto the owning task.
    pub fn update_last_merged_pr_url(&self, run_id: i64, url: &str) -> StoreResult<()> {
        let run = self
            .get_run(run_id)?
            .ok_or_else(|| StoreError::not_found(format!("run {}", run_id)))?;
        let mut task = self
            .get_task(run.task_id)?
            .ok_or_else(|| StoreError::not_found(format!("task {}", run.task_id)))?;
        task.last_merged_pr_url = Some(url.to_string());
        task.updated_at = Utc::now();
        self.put(schema::CF_TASKS, &schema::keys::task(task.task_id), &task)
    }

    // =========================================================================
    // Metrics, triggers, events, config
    // =========================================================================

    pub fn record_performance_metrics(
        &self,
        task_id: i64,
        run_id: i64,
        metrics: &PerformanceMetrics,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(metrics)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut record = self
            .get_run(run_id)?
            .ok_or_else(|| StoreError::not_found(format!("run {}", run_id)))?;
        record.metrics = Some(value.clone());
        self.put(schema::CF_RUNS, &schema::keys::run(run_id), &record)?;
        self.log_application_event(
            Some(task_id),
            "info",
            "engine",
            "performance_metrics",
            "run metrics recorded",
            Some(value),
        )
    }

    pub fn create_update_trigger(
        &self,
        task_id: i64,
        update_id: &str,
        classification: &str,
        confidence: f64,
    ) -> StoreResult<i64> {
        let trigger_id = self.next_id("update_triggers")?;
        let record = UpdateTriggerRecord {
            trigger_id,
            task_id,
            update_id: update_id.to_string(),
            classification: classification.to_string(),
            confidence,
            triggered_run_id: None,
            processed: false,
            created_at: Utc::now(),
        };
        self.put(
            schema::CF_UPDATE_TRIGGERS,
            &schema::keys::update_trigger(trigger_id),
            &record,
        )?;
        Ok(trigger_id)
    }

    pub fn mark_trigger_processed(
        &self,
        trigger_id: i64,
        triggered_run_id: Option<i64>,
    ) -> StoreResult<()> {
        let mut record = self
            .get::<UpdateTriggerRecord>(
                schema::CF_UPDATE_TRIGGERS,
                &schema::keys::update_trigger(trigger_id),
            )?
            .ok_or_else(|| StoreError::not_found(format!("trigger {}", trigger_id)))?;
        record.processed = true;
        record.triggered_run_id = triggered_run_id;
        self.put(
            schema::CF_UPDATE_TRIGGERS,
            &schema::keys::update_trigger(trigger_id),
            &record,
        )
    }

    pub fn get_update_trigger(&self, trigger_id: i64) -> StoreResult<Option<UpdateTriggerRecord>> {
        self.get(
            schema::CF_UPDATE_TRIGGERS,
            &schema::keys::update_trigger(trigger_id),
        )
    }

    /// Append to the application event log. Stored as JSON so events stay
    /// greppable with external tooling.
    pub fn log_application_event(
        &self,
        task_id: Option<i64>,
        level: &str,
        source: &str,
        action: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let record = AppEventRecord {
            task_id,
            level: level.to_string(),
            source: source.to_string(),
            action: action.to_string(),
            message: message.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        let timestamp_nanos = record.created_at.timestamp_nanos_opt().unwrap_or(0);
        let event_id = uuid::Uuid::new_v4().to_string();
        let bytes =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_APP_EVENTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_APP_EVENTS.to_string()))?;
        db.put_cf(
            &cf,
            schema::keys::app_event(timestamp_nanos, &event_id).as_bytes(),
            bytes,
        )?;
        Ok(())
    }

    pub fn set_config(&self, entry: &ConfigEntry) -> StoreResult<()> {
        self.put(schema::CF_CONFIG, &schema::keys::config(&entry.key), entry)
    }

    pub fn get_config(&self, key: &str) -> StoreResult<Option<ConfigEntry>> {
        self.get(schema::CF_CONFIG, &schema::keys::config(key))
    }
}

//! Orchestrator: the two entry points into the engine.
//!
//! A status transition on a completed task reopens it as a reactivation
//! run; an inbound comment goes through mention parsing, intent
//! classification and routing. Both paths pass queue admission before any
//! run exists, and a bounded worker pool executes admitted runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::clients::vector::VectorStore;
use crate::events::SharedEventBus;
use crate::graph::{RunReport, WorkflowEngine, WorkflowState};
use crate::intent::{
    IntentClassifier, RouteOutcome, TaskContext, UpdateRouter, WorkSubmitter,
};
use crate::mention::MentionParser;
use crate::model::{TaskRequest, WorkItemEnvelope};
use crate::nodes::NodeContext;
use crate::queue::Admission;
use crate::store::RunParams;

/// Monday statuses treated as "reopened for work".
const WORKING_STATUSES: &[&str] = &[
    "en cours",
    "à faire",
    "to do",
    "to-do",
    "pending",
    "in progress",
    "in-progress",
    "working on it",
    "working-on-it",
    "working",
];

/// Statuses a task must be leaving for a transition to count as reopening.
const COMPLETED_STATUSES: &[&str] = &["completed", "failed", "quality_check", "quality-check", "done"];

/// What the orchestrator did with an inbound comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentOutcome {
    /// Agent-authored or mention-free comment; nothing to do.
    Ignored { reason: String },
    /// A mention whose command text failed validation.
    InvalidMention { error: String },
    /// Question answered in place; no run created.
    Answered { reply_update_id: String },
    /// A workflow run was created and submitted.
    WorkflowTriggered { run_id: i64, priority: u8 },
}

/// Bounded pool executing admitted runs. Also the router's submission sink.
pub struct WorkerPool {
    ctx: Arc<NodeContext>,
    bus: SharedEventBus,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<NodeContext>, bus: SharedEventBus) -> Self {
        let permits = Arc::new(Semaphore::new(ctx.config.max_parallel_workflows.max(1)));
        Self { ctx, bus, permits }
    }

    /// Run a work item to completion: queue admission, task + run rows,
    /// engine execution, queued-successor resubmission.
    pub async fn run_work_item(
        self: Arc<Self>,
        mut request: TaskRequest,
    ) -> anyhow::Result<Option<RunReport>> {
        let external_id = request
            .monday_item_id
            .or_else(|| request.task_id.parse().ok())
            .unwrap_or_default();

        let queue_id = request
            .queue_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        request.queue_id = Some(queue_id.clone());

        match self.ctx.queue.admit(external_id, &queue_id, &request)? {
            Admission::Admitted => {}
            Admission::RejectedDuplicate => {
                info!(external_id, "Duplicate work item rejected, no run created");
                return Ok(None);
            }
            Admission::Queued { position } => {
                info!(external_id, position, "Work item queued behind active run");
                return Ok(None);
            }
        }

        let _permit = self.permits.clone().acquire_owned().await?;

        // Open (or reuse) the task row, then backfill the request from it
        let task_db_id = match request.task_db_id {
            Some(id) => id,
            None => {
                let mut envelope = WorkItemEnvelope::new(external_id);
                envelope.title = Some(request.title.clone());
                envelope.board_id = request.board_id;
                self.ctx.store.create_or_load_task(&envelope)?
            }
        };
        if let Some(task) = self.ctx.store.get_task(task_db_id)? {
            if request.repository_url.is_none() {
                request.repository_url = task.repository_url.clone();
            }
            if request.description.is_empty() {
                request.description = task.description.clone();
            }
            if request.title.is_empty() {
                request.title = task.title.clone();
            }
        }
        request.task_db_id = Some(task_db_id);

        let correlation_id = format!("run_{}", uuid::Uuid::new_v4().simple());
        let workflow_id = format!("workflow_{}_{}", request.task_id, Utc::now().timestamp());
        let run_id = self.ctx.store.start_run(
            task_db_id,
            RunParams {
                workflow_id: workflow_id.clone(),
                correlation_id: correlation_id.clone(),
                precreated_run_id: request.run_id,
                ai_provider: Some(self.ctx.llm.provider_name().to_string()),
                reactivation_count: request.reactivation_count,
                source_branch: request.source_branch.clone(),
                triggered_by: None,
            },
        )?;

        info!(
            workflow_id = %workflow_id,
            task_db_id,
            run_id,
            is_reactivation = request.is_reactivation,
            "Run opened"
        );

        let state = WorkflowState::new(
            request,
            workflow_id,
            Some(task_db_id),
            Some(run_id),
            Some(correlation_id),
        );

        let engine = WorkflowEngine::new(self.ctx.clone(), self.bus.clone());
        let report = engine.execute(state).await;

        // A failed run that never reached update_monday still holds its slot
        if !report.success {
            let _ = self.ctx.queue.mark_failed(
                external_id,
                &queue_id,
                report.error.as_deref().unwrap_or("workflow failed"),
            );
        }

        // update_monday surfaces the next queued request on release
        if let Some(next) = report.final_state.results.get("next_queued_request").cloned() {
            if let Ok(mut next_request) = serde_json::from_value::<TaskRequest>(next) {
                next_request.queue_id = report
                    .final_state
                    .results
                    .get_str("next_queue_id")
                    .map(String::from);
                let pool = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = pool.run_work_item(next_request).await {
                        warn!(error = %e, "Queued successor failed");
                    }
                });
            }
        }

        Ok(Some(report))
    }

    /// Resume a run interrupted by a crash: rebuild state from the task row
    /// and saved checkpoints, then drive from the first incomplete node.
    pub async fn resume_run(
        self: Arc<Self>,
        run: crate::store::RunRecord,
    ) -> anyhow::Result<Option<RunReport>> {
        let Some(task) = self.ctx.store.get_task(run.task_id)? else {
            anyhow::bail!("run {} references missing task {}", run.run_id, run.task_id);
        };

        let mut request = TaskRequest::new(task.external_id.to_string(), task.title.clone());
        request.description = task.description.clone();
        request.task_type = task.task_type;
        request.priority = task.priority;
        request.repository_url = task.repository_url.clone();
        request.monday_item_id = Some(task.external_id);
        request.board_id = task.board_id;
        request.task_db_id = Some(task.task_id);
        request.creator_name = task.creator_name.clone();
        request.is_reactivation = run.reactivation_count > 0;
        request.reactivation_count = run.reactivation_count;
        request.source_branch = run.source_branch.clone();

        let queue_id = uuid::Uuid::new_v4().to_string();
        request.queue_id = Some(queue_id.clone());
        match self.ctx.queue.admit(task.external_id, &queue_id, &request)? {
            Admission::Admitted => {}
            other => {
                info!(run_id = run.run_id, ?other, "Recovery deferred, slot busy");
                return Ok(None);
            }
        }
        let _permit = self.permits.clone().acquire_owned().await?;

        let mut state = WorkflowState::new(
            request,
            run.workflow_id.clone(),
            Some(run.task_id),
            Some(run.run_id),
            Some(run.uuid_run_id.clone()),
        );
        state.recovery_mode = true;
        let checkpoints = self.ctx.store.load_checkpoints(run.run_id)?;
        // The newest checkpoint carries the results snapshot to merge back
        if let Some(last) = checkpoints.last() {
            if let Some(results) = last.payload.get("results").and_then(|v| v.as_object()) {
                state.results.merge(results);
            }
        }
        for checkpoint in checkpoints {
            state.mark_node_completed(&checkpoint.node_name);
            state
                .checkpoint_data
                .insert(checkpoint.node_name.clone(), checkpoint.payload);
        }

        info!(
            run_id = run.run_id,
            completed = state.completed_nodes.len(),
            "Resuming interrupted run"
        );
        let engine = WorkflowEngine::new(self.ctx.clone(), self.bus.clone());
        let report = engine.execute(state).await;

        if !report.success {
            let _ = self.ctx.queue.mark_failed(
                task.external_id,
                &queue_id,
                report.error.as_deref().unwrap_or("recovery failed"),
            );
        }
        Ok(Some(report))
    }
}

#[async_trait]
impl WorkSubmitter for Arc<WorkerPool> {
    async fn submit(&self, request: TaskRequest, priority: u8) -> anyhow::Result<()> {
        info!(priority, task_id = %request.task_id, "Work item submitted");
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pool.run_work_item(request).await {
                warn!(error = %e, "Submitted work item failed");
            }
        });
        Ok(())
    }
}

/// Front door for webhooks and mentions.
pub struct Orchestrator {
    ctx: Arc<NodeContext>,
    pool: Arc<WorkerPool>,
    parser: MentionParser,
    classifier: IntentClassifier,
    router: UpdateRouter,
    vector: Arc<dyn VectorStore>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<NodeContext>, bus: SharedEventBus, vector: Arc<dyn VectorStore>) -> Self {
        let pool = Arc::new(WorkerPool::new(ctx.clone(), bus));
        let classifier = IntentClassifier::new(ctx.llm.clone());
        let router = UpdateRouter::new(
            ctx.llm.clone(),
            ctx.monday.clone(),
            ctx.store.clone(),
            Arc::new(pool.clone()),
        );
        Self {
            ctx,
            pool,
            parser: MentionParser::new(),
            classifier,
            router,
            vector,
        }
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    /// Whether a status transition reopens the task.
    pub fn should_trigger_from_status(old_status: &str, new_status: &str) -> bool {
        let old = old_status.trim().to_lowercase();
        let new = new_status.trim().to_lowercase();
        COMPLETED_STATUSES.contains(&old.as_str()) && WORKING_STATUSES.contains(&new.as_str())
    }

    /// Entry point 1: a status column transition.
    pub async fn handle_status_transition(
        &self,
        envelope: &WorkItemEnvelope,
    ) -> anyhow::Result<bool> {
        let Some((old_status, new_status)) = envelope.status_transition() else {
            return Ok(false);
        };
        if !Self::should_trigger_from_status(&old_status, &new_status) {
            return Ok(false);
        }

        info!(
            external_id = envelope.external_id,
            old = %old_status,
            new = %new_status,
            "Status transition reopens the task"
        );

        let task_db_id = self.ctx.store.create_or_load_task(envelope)?;
        let previous_runs = self.ctx.store.list_runs_for_task(task_db_id)?;
        let reactivation_count = previous_runs
            .iter()
            .map(|r| r.reactivation_count)
            .max()
            .map(|c| c + 1)
            .unwrap_or(1);
        let is_first_run = previous_runs.is_empty();

        let mut request = envelope.to_task_request();
        request.task_db_id = Some(task_db_id);
        if !is_first_run {
            request.is_reactivation = true;
            request.reactivation_count = reactivation_count;
            request.source_branch = "main".to_string();
            request.reactivation_context =
                Some(format!("Statut passé de '{}' à '{}'", old_status, new_status));
        }

        let priority = request.priority.submission_priority();
        WorkSubmitter::submit(&self.pool, request, priority).await?;
        Ok(true)
    }

    /// Entry point 2: an inbound comment (mention envelope).
    pub async fn handle_inbound_comment(
        &self,
        envelope: &WorkItemEnvelope,
    ) -> anyhow::Result<CommentOutcome> {
        let text = envelope.text_body.as_deref().unwrap_or_default();
        let Some(update_id) = envelope.update_id.as_deref() else {
            return Ok(CommentOutcome::Ignored {
                reason: "missing update id".to_string(),
            });
        };

        if self.parser.is_agent_message(text) {
            info!("Agent-authored comment ignored");
            return Ok(CommentOutcome::Ignored {
                reason: "agent message".to_string(),
            });
        }

        let parsed = self.parser.parse_mention(text);
        if !parsed.has_mention {
            return Ok(CommentOutcome::Ignored {
                reason: parsed
                    .error_message
                    .unwrap_or_else(|| "no mention".to_string()),
            });
        }
        if !parsed.is_valid {
            warn!(error = ?parsed.error_message, "Invalid mention");
            return Ok(CommentOutcome::InvalidMention {
                error: parsed.error_message.unwrap_or_default(),
            });
        }

        let task_db_id = self.ctx.store.create_or_load_task(envelope)?;
        let task = self
            .ctx
            .store
            .get_task(task_db_id)?
            .ok_or_else(|| anyhow::anyhow!("task {} vanished after creation", task_db_id))?;

        let context = TaskContext {
            task_title: task.title.clone(),
            task_status: task.internal_status.to_string(),
            monday_status: task.external_status.clone(),
            original_description: task.description.clone(),
        };
        let intent = self.classifier.analyze(&parsed.cleaned_text, &context).await;

        // Retrieval enrichment is best-effort and never blocks routing
        let retrieval_context = self
            .enrich_from_vector_store(&parsed.cleaned_text, task_db_id)
            .await;

        let outcome = self
            .router
            .route(
                &intent,
                &task,
                &context,
                &parsed.cleaned_text,
                update_id,
                &retrieval_context,
            )
            .await?;

        Ok(match outcome {
            RouteOutcome::QuestionAnswered { reply_update_id } => {
                CommentOutcome::Answered { reply_update_id }
            }
            RouteOutcome::CommandWorkflow { run_id, priority } => {
                CommentOutcome::WorkflowTriggered { run_id, priority }
            }
        })
    }

    /// Resume every run a previous process left non-terminal, waiting for
    /// all of them to reach a terminal state. Returns the number of runs
    /// dispatched.
    pub async fn recover_incomplete_runs(&self) -> anyhow::Result<u32> {
        let mut handles = Vec::new();
        for run in self.ctx.store.list_incomplete_runs()? {
            let pool = self.pool.clone();
            info!(run_id = run.run_id, "Dispatching interrupted run for recovery");
            handles.push(tokio::spawn(async move {
                if let Err(e) = pool.resume_run(run).await {
                    warn!(error = %e, "Run recovery failed");
                }
            }));
        }
        let dispatched = handles.len() as u32;
        for handle in handles {
            let _ = handle.await;
        }
        Ok(dispatched)
    }

    async fn enrich_from_vector_store(&self, text: &str, task_id: i64) -> Vec<String> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("task_id".to_string(), task_id.to_string());
        if let Err(e) = self.vector.store_message(text, metadata).await {
            warn!(error = %e, "Vector store write failed");
        }
        match self.vector.query(text, 5).await {
            Ok(hits) => hits.into_iter().map(|h| h.text).collect(),
            Err(e) => {
                warn!(error = %e, "Vector query failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted no-op collaborators for unit tests that need a context.

    use super::*;
    use crate::clients::browser::{BrowserQaClient, BrowserQaReport};
    use crate::clients::git::GitOps;
    use crate::clients::github::GitHubClient;
    use crate::clients::llm::{Completion, CompletionRequest, LlmClient};
    use crate::clients::monday::{MondayClient, MondayItemInfo, MondayReply};
    use crate::clients::slack::SlackClient;
    use crate::clients::CollaboratorResult;
    use crate::config::OrchestratorConfig;
    use crate::model::{PullRequestInfo, TestReport};
    use crate::nodes::TestRunner;
    use crate::queue::QueueManager;
    use crate::store::PersistenceStore;
    use crate::validation::{NotificationCoordinator, ValidationStore};
    use std::path::Path;

    pub struct NoopLlm;

    #[async_trait]
    impl LlmClient for NoopLlm {
        fn provider_name(&self) -> &str {
            "noop"
        }

        fn model_name(&self) -> &str {
            "noop"
        }

        async fn complete(&self, _request: &CompletionRequest) -> CollaboratorResult<Completion> {
            Ok(Completion {
                content: r#"{"files": {"main.txt": "hello"}, "summary": "noop"}"#.to_string(),
                input_tokens: 1,
                output_tokens: 1,
                latency_ms: 1,
                provider_used: "noop".to_string(),
                model: "noop".to_string(),
            })
        }
    }

    pub struct NoopGit;

    #[async_trait]
    impl GitOps for NoopGit {
        async fn clone_repo(
            &self,
            _url: &str,
            _branch: Option<&str>,
            dest: &Path,
        ) -> CollaboratorResult<()> {
            std::fs::create_dir_all(dest).ok();
            Ok(())
        }

        async fn checkout(&self, _dir: &Path, _branch: &str, _create: bool) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn add_all(&self, _dir: &Path) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn diff_names_cached(&self, _dir: &Path) -> CollaboratorResult<Vec<String>> {
            Ok(vec!["main.txt".to_string()])
        }

        async fn commit(&self, _dir: &Path, _message: &str) -> CollaboratorResult<String> {
            Ok("abc1234".to_string())
        }

        async fn push(&self, _dir: &Path, _branch: &str, _remote: &str) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn head_commit(&self, _dir: &Path) -> CollaboratorResult<String> {
            Ok("abc1234".to_string())
        }
    }

    pub struct NoopGitHub;

    #[async_trait]
    impl GitHubClient for NoopGitHub {
        async fn create_pr(
            &self,
            _repo: &str,
            title: &str,
            _body: &str,
            head: &str,
            base: &str,
        ) -> CollaboratorResult<PullRequestInfo> {
            Ok(PullRequestInfo {
                number: 18,
                title: title.to_string(),
                url: "https://github.com/owner/repo/pull/18".to_string(),
                branch: head.to_string(),
                base_branch: base.to_string(),
                status: "open".to_string(),
                head_sha: Some("abc1234".to_string()),
                created_at: Utc::now(),
            })
        }

        async fn merge_pr(
            &self,
            _repo: &str,
            _number: i64,
            _method: &str,
            _message: &str,
        ) -> CollaboratorResult<String> {
            Ok("merge5678".to_string())
        }

        async fn delete_branch(&self, _repo: &str, _branch: &str) -> CollaboratorResult<()> {
            Ok(())
        }
    }

    pub struct NoopMonday;

    #[async_trait]
    impl MondayClient for NoopMonday {
        async fn post_update(&self, _item_id: i64, _body: &str) -> CollaboratorResult<String> {
            Ok("update-1".to_string())
        }

        async fn poll_replies(&self, _update_id: &str) -> CollaboratorResult<Vec<MondayReply>> {
            Ok(vec![])
        }

        async fn update_column_value(
            &self,
            _item_id: i64,
            _column_id: &str,
            _value: &str,
        ) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn get_item_info(&self, item_id: i64) -> CollaboratorResult<MondayItemInfo> {
            Ok(MondayItemInfo {
                item_id,
                ..Default::default()
            })
        }
    }

    pub struct NoopSlack;

    #[async_trait]
    impl SlackClient for NoopSlack {
        async fn lookup_user_by_email(&self, _email: &str) -> CollaboratorResult<Option<String>> {
            Ok(None)
        }

        async fn post_message(&self, _user_id: &str, _text: &str) -> CollaboratorResult<()> {
            Ok(())
        }
    }

    pub struct NoopBrowserQa;

    #[async_trait]
    impl BrowserQaClient for NoopBrowserQa {
        async fn run(&self, _base_url: &str) -> CollaboratorResult<BrowserQaReport> {
            Ok(BrowserQaReport::default())
        }
    }

    pub struct NoTestsRunner;

    #[async_trait]
    impl TestRunner for NoTestsRunner {
        async fn run(&self, _working_dir: &Path) -> CollaboratorResult<TestReport> {
            Ok(TestReport::no_tests("none"))
        }
    }

    /// Context against a temp store and no-op collaborators. The temp dir
    /// is leaked for the test's lifetime.
    pub fn noop_context() -> NodeContext {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::open(dir.path().join("s.db"))
            .unwrap()
            .shared();
        std::mem::forget(dir);

        let validations = ValidationStore::new(store.clone()).shared();
        let monday: Arc<dyn MondayClient> = Arc::new(NoopMonday);
        let slack: Arc<dyn SlackClient> = Arc::new(NoopSlack);
        let notifier = Arc::new(NotificationCoordinator::new(
            slack.clone(),
            monday.clone(),
            validations.clone(),
        ));

        NodeContext {
            config: OrchestratorConfig::default(),
            store,
            validations,
            notifier,
            queue: Arc::new(QueueManager::new()),
            llm: Arc::new(NoopLlm),
            git: Arc::new(NoopGit),
            github: Arc::new(NoopGitHub),
            monday,
            monday_enabled: true,
            slack,
            browser_qa: Arc::new(NoopBrowserQa),
            test_runner: Arc::new(NoTestsRunner),
            workspace_root: std::env::temp_dir(),
            github_token: None,
            browser_base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transition_matrix() {
        assert!(Orchestrator::should_trigger_from_status("Done", "Working on it"));
        assert!(Orchestrator::should_trigger_from_status("completed", "to do"));
        assert!(Orchestrator::should_trigger_from_status("failed", "in progress"));
        assert!(!Orchestrator::should_trigger_from_status("Working on it", "Done"));
        assert!(!Orchestrator::should_trigger_from_status("backlog", "working"));
        assert!(!Orchestrator::should_trigger_from_status("done", "done"));
    }
}

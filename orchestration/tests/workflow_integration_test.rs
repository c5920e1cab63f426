//! End-to-end workflow scenarios over scripted collaborators.
//!
//! Each scenario drives a full run through the worker pool against a
//! temp-dir store: happy path with approval and merge, the bounded debug
//! loop, rejection-with-retry, timeout auto-approval, and the
//! question-answer path that never opens a run.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use orchestration::clients::browser::{BrowserQaClient, BrowserQaReport};
use orchestration::clients::git::GitOps;
use orchestration::clients::github::GitHubClient;
use orchestration::clients::llm::{Completion, CompletionRequest, LlmClient};
use orchestration::clients::monday::{MondayClient, MondayItemInfo, MondayReply};
use orchestration::clients::slack::SlackClient;
use orchestration::clients::vector::NoopVectorStore;
use orchestration::clients::CollaboratorResult;
use orchestration::model::PullRequestInfo;
use orchestration::nodes::TestRunner;
use orchestration::store::PullRequestStatus;
use orchestration::{
    CommentOutcome, EventBus, NodeContext, NotificationCoordinator, Orchestrator,
    OrchestratorConfig, PersistenceStore, QueueManager, TaskRequest, TestReport, ValidationStore,
    WorkItemEnvelope, WorkerPool, WorkflowStatus,
};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct ScriptedLlm {
    classification_reply: Option<String>,
}

impl ScriptedLlm {
    fn coder() -> Self {
        Self {
            classification_reply: None,
        }
    }

    fn classifier(reply: &str) -> Self {
        Self {
            classification_reply: Some(reply.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> CollaboratorResult<Completion> {
        let content = if request.prompt.contains("Analyse ce commentaire") {
            self.classification_reply.clone().unwrap_or_else(|| {
                r#"{"type": "QUESTION", "confidence": 0.9, "requires_workflow": false, "reasoning": "q"}"#
                    .to_string()
            })
        } else if request.prompt.contains("Analyse cette tâche") {
            r#"{"complexity": "low", "estimated_files": ["main.txt"], "plan": ["create file"], "risks": []}"#
                .to_string()
        } else if request.prompt.contains("Les tests échouent")
            || request.prompt.contains("relecteur humain")
        {
            r#"{"files": {"main.txt": "fixed"}, "diagnosis": "typo"}"#.to_string()
        } else if request.prompt.contains("Implémente la tâche") {
            r#"{"files": {"main.txt": "contenu"}, "summary": "Ajout de main.txt"}"#.to_string()
        } else {
            "Réponse directe de l'assistant.".to_string()
        };
        Ok(Completion {
            content,
            input_tokens: 50,
            output_tokens: 80,
            latency_ms: 3,
            provider_used: "scripted".to_string(),
            model: "scripted-model".to_string(),
        })
    }
}

#[derive(Default)]
struct ScriptedMonday {
    posts: Mutex<Vec<(i64, String)>>,
    reply_batches: Mutex<VecDeque<Vec<String>>>,
    current_replies: Mutex<Vec<String>>,
}

impl ScriptedMonday {
    fn with_replies(batches: Vec<Vec<&str>>) -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            reply_batches: Mutex::new(
                batches
                    .into_iter()
                    .map(|batch| batch.into_iter().map(String::from).collect())
                    .collect(),
            ),
            current_replies: Mutex::new(Vec::new()),
        }
    }

    fn posts(&self) -> Vec<(i64, String)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MondayClient for ScriptedMonday {
    async fn post_update(&self, item_id: i64, body: &str) -> CollaboratorResult<String> {
        let mut posts = self.posts.lock().unwrap();
        posts.push((item_id, body.to_string()));
        Ok(format!("update-{}", posts.len()))
    }

    async fn poll_replies(&self, _update_id: &str) -> CollaboratorResult<Vec<MondayReply>> {
        if let Some(batch) = self.reply_batches.lock().unwrap().pop_front() {
            *self.current_replies.lock().unwrap() = batch;
        }
        Ok(self
            .current_replies
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, body)| MondayReply {
                reply_id: format!("r{}", i),
                body: body.clone(),
                creator_id: Some(99),
                created_at: Some(Utc::now()),
            })
            .collect())
    }

    async fn update_column_value(
        &self,
        item_id: i64,
        column_id: &str,
        value: &str,
    ) -> CollaboratorResult<()> {
        self.posts
            .lock()
            .unwrap()
            .push((item_id, format!("[column:{}]{}", column_id, value)));
        Ok(())
    }

    async fn get_item_info(&self, item_id: i64) -> CollaboratorResult<MondayItemInfo> {
        Ok(MondayItemInfo {
            item_id,
            name: "item".to_string(),
            board_id: Some(1),
            status: None,
            creator_email: Some("dev@example.com".to_string()),
            creator_name: Some("Dev".to_string()),
        })
    }
}

#[derive(Default)]
struct RecordingSlack {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl SlackClient for RecordingSlack {
    async fn lookup_user_by_email(&self, _email: &str) -> CollaboratorResult<Option<String>> {
        Ok(Some("U999".to_string()))
    }

    async fn post_message(&self, _user_id: &str, text: &str) -> CollaboratorResult<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedGitHub {
    merges: Mutex<Vec<i64>>,
}

#[async_trait]
impl GitHubClient for ScriptedGitHub {
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
            head_sha: Some("headsha".to_string()),
            created_at: Utc::now(),
        })
    }

    async fn merge_pr(
        &self,
        _repo: &str,
        number: i64,
        _method: &str,
        _message: &str,
    ) -> CollaboratorResult<String> {
        self.merges.lock().unwrap().push(number);
        Ok("mergesha123".to_string())
    }

    async fn delete_branch(&self, _repo: &str, _branch: &str) -> CollaboratorResult<()> {
        Ok(())
    }
}

struct FakeGit;

#[async_trait]
impl GitOps for FakeGit {
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

struct NoBrowser;

#[async_trait]
impl BrowserQaClient for NoBrowser {
    async fn run(&self, _base_url: &str) -> CollaboratorResult<BrowserQaReport> {
        Ok(BrowserQaReport::default())
    }
}

struct SeqTestRunner {
    reports: Mutex<VecDeque<TestReport>>,
    last: Mutex<Option<TestReport>>,
}

impl SeqTestRunner {
    fn new(reports: Vec<TestReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            last: Mutex::new(None),
        }
    }

    fn no_tests() -> Self {
        Self::new(vec![])
    }

    fn failing(failed: u32, total: u32) -> TestReport {
        TestReport {
            success: false,
            test_type: "cargo".to_string(),
            total_tests: total,
            passed_tests: total - failed,
            failed_tests: failed,
            skipped_tests: 0,
            coverage_percentage: None,
            output: format!("{} failed, {} passed", failed, total - failed),
            error: Some("tests failed".to_string()),
            no_tests_found: false,
            duration_seconds: 0.1,
        }
    }

    fn passing(total: u32) -> TestReport {
        TestReport {
            success: true,
            failed_tests: 0,
            passed_tests: total,
            error: None,
            ..Self::failing(0, total)
        }
    }
}

#[async_trait]
impl TestRunner for SeqTestRunner {
    async fn run(&self, _working_dir: &Path) -> CollaboratorResult<TestReport> {
        if let Some(report) = self.reports.lock().unwrap().pop_front() {
            *self.last.lock().unwrap() = Some(report.clone());
            return Ok(report);
        }
        if let Some(last) = self.last.lock().unwrap().clone() {
            return Ok(last);
        }
        Ok(TestReport::no_tests("none"))
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    ctx: Arc<NodeContext>,
    pool: Arc<WorkerPool>,
    monday: Arc<ScriptedMonday>,
    slack: Arc<RecordingSlack>,
    github: Arc<ScriptedGitHub>,
    queue: Arc<QueueManager>,
    _dir: tempfile::TempDir,
}

fn fixture_with(
    monday: ScriptedMonday,
    runner: SeqTestRunner,
    llm: ScriptedLlm,
    mut config: OrchestratorConfig,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    config.validation_timeout_command_secs = 2;
    config.validation_timeout_question_secs = 2;
    config.validation_reminder_secs = Some(0);

    let store = PersistenceStore::open(dir.path().join("store.db"))
        .unwrap()
        .shared();
    let validations = ValidationStore::new(store.clone()).shared();
    let monday: Arc<ScriptedMonday> = Arc::new(monday);
    let slack = Arc::new(RecordingSlack::default());
    let github = Arc::new(ScriptedGitHub::default());
    let queue = Arc::new(QueueManager::new());

    let notifier = Arc::new(
        NotificationCoordinator::new(slack.clone(), monday.clone(), validations.clone())
            .with_poll_interval(Duration::from_millis(30)),
    );

    let ctx = Arc::new(NodeContext {
        config,
        store,
        validations,
        notifier,
        queue: queue.clone(),
        llm: Arc::new(llm),
        git: Arc::new(FakeGit),
        github: github.clone(),
        monday: monday.clone(),
        monday_enabled: true,
        slack: slack.clone(),
        browser_qa: Arc::new(NoBrowser),
        test_runner: Arc::new(runner),
        workspace_root: dir.path().join("workspaces"),
        github_token: None,
        browser_base_url: None,
    });

    let bus = EventBus::with_persistence(ctx.store.clone()).shared();
    let pool = Arc::new(WorkerPool::new(ctx.clone(), bus));

    Fixture {
        ctx,
        pool,
        monday,
        slack,
        github,
        queue,
        _dir: dir,
    }
}

fn request(external_id: i64, title: &str, description: &str) -> TaskRequest {
    let mut request = TaskRequest::new(external_id.to_string(), title);
    request.description = description.to_string();
    request.monday_item_id = Some(external_id);
    request.repository_url = Some("https://github.com/owner/repo".to_string());
    request
}

// ---------------------------------------------------------------------------
// E1 — happy path, approved and merged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn e1_happy_path_approved_and_merged() {
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![vec!["oui"]]),
        SeqTestRunner::no_tests(),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    let report = fixture
        .pool
        .clone()
        .run_work_item(request(
            5029145622,
            "Ajouter un fichier main.txt",
            "Ajouter un fichier main.txt",
        ))
        .await
        .unwrap()
        .expect("run admitted");

    assert!(report.success, "error: {:?}", report.error);
    assert_eq!(report.status, WorkflowStatus::Completed);

    let results = &report.final_state.results;
    assert!(results.get_bool("merge_successful"));
    assert_eq!(results.get_str("monday_final_status"), Some("Done"));
    assert_eq!(results.modified_files(), vec!["main.txt"]);
    assert!(results.get_bool("no_tests_found"));

    // P1: the PR row carries both ids of this run
    let run_id = report.final_state.db_run_id.unwrap();
    let task_id = report.final_state.db_task_id.unwrap();
    let pr = fixture.ctx.store.get_pull_request(run_id).unwrap().unwrap();
    assert_eq!(pr.task_id, task_id);
    assert_eq!(pr.run_id, run_id);
    assert_eq!(pr.external_number, 18);
    assert_eq!(pr.url, "https://github.com/owner/repo/pull/18");
    assert_eq!(pr.status, PullRequestStatus::Merged);

    // Merge delegated to the GitHub collaborator
    assert_eq!(*fixture.github.merges.lock().unwrap(), vec![18]);

    // Final status + completion comment posted
    let posts = fixture.monday.posts();
    assert!(posts.iter().any(|(_, body)| body.contains("[column:status]Done")));
    assert!(posts.iter().any(|(_, body)| body.contains("Tâche Complétée")));

    // Queue slot released
    assert!(!fixture.queue.has_active(5029145622));

    // Steps are strictly ordered and match graph execution (P ordering)
    let steps = fixture.ctx.store.list_steps(run_id).unwrap();
    let names: Vec<&str> = steps.iter().map(|s| s.node_name.as_str()).collect();
    assert_eq!(names[0], "prepare_environment");
    assert_eq!(names[1], "analyze_requirements");
    assert_eq!(names[2], "implement_task");
    assert_eq!(names[3], "run_tests");
    assert_eq!(*names.last().unwrap(), "update_monday");
    let orders: Vec<u32> = steps.iter().map(|s| s.step_order).collect();
    let mut sorted = orders.clone();
    sorted.sort_unstable();
    assert_eq!(orders, sorted);

    // P7: persisted timestamps are consistent
    let run = fixture.ctx.store.get_run(run_id).unwrap().unwrap();
    assert!(run.completed_at.unwrap() >= run.started_at);
}

// ---------------------------------------------------------------------------
// E2 — one debug round, then approval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn e2_debug_loop_then_approve() {
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![vec!["oui"]]),
        SeqTestRunner::new(vec![
            SeqTestRunner::failing(2, 5),
            SeqTestRunner::passing(5),
        ]),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    let report = fixture
        .pool
        .clone()
        .run_work_item(request(600, "Fix tests", "desc"))
        .await
        .unwrap()
        .unwrap();

    assert!(report.success, "error: {:?}", report.error);
    let results = &report.final_state.results;
    assert_eq!(results.debug_attempts(), 1);
    assert!(report
        .final_state
        .completed_nodes
        .iter()
        .any(|n| n == "debug_code"));
    assert!(results.get_bool("merge_successful"));

    // The second, green test run is the last report
    let last = results.last_test_report().unwrap();
    assert!(last.success);
    assert_eq!(last.total_tests, 5);
}

// ---------------------------------------------------------------------------
// E3 — debug bound exceeded, workflow still reaches validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn e3_debug_bound_exceeded() {
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![vec!["non"]]),
        SeqTestRunner::new(vec![
            SeqTestRunner::failing(2, 5),
            SeqTestRunner::failing(2, 5),
            SeqTestRunner::failing(2, 5),
        ]),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    let report = fixture
        .pool
        .clone()
        .run_work_item(request(700, "Impossible fix", "desc"))
        .await
        .unwrap()
        .unwrap();

    let results = &report.final_state.results;
    // P3: never more debug rounds than the bound
    assert_eq!(results.debug_attempts(), 2);
    assert!(results
        .error_logs()
        .iter()
        .any(|e| e.contains("Tests échoués après 2 tentatives de debug")));
    // The run still reached the human gate
    assert!(report
        .final_state
        .completed_nodes
        .iter()
        .any(|n| n == "monday_validation"));
    // Rejected without retry: no merge
    assert!(!results.get_bool("merge_successful"));
}

// ---------------------------------------------------------------------------
// E4 — rejection with retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn e4_rejection_with_retry() {
    let config = OrchestratorConfig {
        // Two validation rounds need headroom over the default dispatch cap
        max_nodes_safety_limit: 20,
        ..Default::default()
    };
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![vec!["non, Use UTF-8 BOM"], vec!["oui"]]),
        SeqTestRunner::no_tests(),
        ScriptedLlm::coder(),
        config,
    );

    let report = fixture
        .pool
        .clone()
        .run_work_item(request(800, "Encode file", "desc"))
        .await
        .unwrap()
        .unwrap();

    assert!(report.success, "error: {:?}", report.error);
    let results = &report.final_state.results;

    // The retry round went back through implementation and was then merged
    assert!(results.get_bool("merge_successful"));
    assert_eq!(results.get_u32("rejection_count"), 1);
    assert_eq!(
        results.get_str("modification_instructions"),
        Some("Use UTF-8 BOM")
    );

    // Reimplementation announcement posted exactly once
    let posts = fixture.monday.posts();
    let reimplementation_posts = posts
        .iter()
        .filter(|(_, body)| body.contains("RÉACTIVATION"))
        .count();
    assert_eq!(reimplementation_posts, 1);

    // implement_task ran twice (superseded entry sits at its last position)
    let steps = fixture
        .ctx
        .store
        .list_steps(report.final_state.db_run_id.unwrap())
        .unwrap();
    let implement_steps = steps
        .iter()
        .filter(|s| s.node_name == "implement_task")
        .count();
    assert_eq!(implement_steps, 2);
}

// ---------------------------------------------------------------------------
// E5 — validation timeout with auto-approval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn e5_timeout_auto_approve() {
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![]),
        SeqTestRunner::no_tests(),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    let mut req = request(900, "Silent approval", "desc");
    // Reactivations use the command timeout and get the Slack escalation
    req.is_reactivation = true;
    req.reactivation_count = 1;

    let report = fixture
        .pool
        .clone()
        .run_work_item(req)
        .await
        .unwrap()
        .unwrap();

    assert!(report.success, "error: {:?}", report.error);
    let results = &report.final_state.results;
    assert!(results.get_bool("auto_approved"));
    assert!(results.get_bool("merge_successful"));
    // approve_auto is normalized to approved by the router
    assert_eq!(results.get_str("human_decision"), Some("approved"));

    // Slack: the immediate waiting notification plus one reminder
    let messages = fixture.slack.messages.lock().unwrap();
    let reminders = messages.iter().filter(|m| m.contains("Rappel")).count();
    assert_eq!(reminders, 1);
    assert!(messages.iter().any(|m| m.contains("Validation requise")));
}

// ---------------------------------------------------------------------------
// E6 — mention question: reply, no run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn e6_question_mention_answers_without_run() {
    let fixture = fixture_with(
        ScriptedMonday::default(),
        SeqTestRunner::no_tests(),
        ScriptedLlm::classifier(
            r#"{"type": "QUESTION", "confidence": 0.93, "requires_workflow": false, "reasoning": "pure question"}"#,
        ),
        OrchestratorConfig::default(),
    );

    let bus = EventBus::new().shared();
    let orchestrator = Orchestrator::new(fixture.ctx.clone(), bus, Arc::new(NoopVectorStore));

    let mut envelope = WorkItemEnvelope::new(1000);
    envelope.title = Some("Projet Java".to_string());
    envelope.update_id = Some("update-77".to_string());
    envelope.text_body = Some("@vydata Pourquoi ce projet utilise-t-il Java ?".to_string());

    let outcome = orchestrator.handle_inbound_comment(&envelope).await.unwrap();
    assert!(matches!(outcome, CommentOutcome::Answered { .. }));

    // A reply was posted with the agent signature
    let posts = fixture.monday.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].1.starts_with("🤖 **Réponse VyData**"));

    // No run was created for the task
    let task_id = fixture.ctx.store.find_task_by_external(1000).unwrap().unwrap();
    assert!(fixture
        .ctx
        .store
        .list_runs_for_task(task_id)
        .unwrap()
        .is_empty());

    // The trigger row exists with a null run id
    let trigger = fixture.ctx.store.get_update_trigger(1).unwrap().unwrap();
    assert_eq!(trigger.classification, "question");
    assert_eq!(trigger.triggered_run_id, None);
    assert!(trigger.processed);
}

// ---------------------------------------------------------------------------
// Queue behaviour across runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_submission_is_rejected_while_active() {
    let fixture = fixture_with(
        // Never replies: the first run parks on the validation gate
        ScriptedMonday::with_replies(vec![]),
        SeqTestRunner::no_tests(),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    let first = fixture.pool.clone();
    let req = request(1100, "Long task", "desc");
    let duplicate = req.clone();
    let background = tokio::spawn(async move { first.run_work_item(req).await });

    // Give the first run time to occupy the slot
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fixture.queue.has_active(1100));

    let second = fixture
        .pool
        .clone()
        .run_work_item(duplicate)
        .await
        .unwrap();
    assert!(second.is_none(), "duplicate must not open a run");

    let report = background.await.unwrap().unwrap().unwrap();
    // Auto-approved on timeout, released afterwards
    assert!(!fixture.queue.has_active(1100));
    assert!(report.final_state.results.get_bool("auto_approved"));
}

// ---------------------------------------------------------------------------
// Crash recovery: resume at the first incomplete node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_resumes_at_first_incomplete_node() {
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![vec!["oui"]]),
        SeqTestRunner::no_tests(),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    // A previous process got through prepare/analyze/implement, then died
    let mut seed = WorkItemEnvelope::new(1300);
    seed.title = Some("Interrupted".to_string());
    seed.column_values.insert(
        "repository_url".to_string(),
        orchestration::model::ColumnValue {
            text: Some("https://github.com/owner/repo".to_string()),
            ..Default::default()
        },
    );
    let task_id = fixture.ctx.store.create_or_load_task(&seed).unwrap();
    let run_id = fixture
        .ctx
        .store
        .start_run(
            task_id,
            orchestration::RunParams {
                workflow_id: "workflow_1300_recovered".to_string(),
                correlation_id: "run_recovered".to_string(),
                source_branch: "main".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    let workdir = fixture.ctx.workspace_root.join("recovered");
    std::fs::create_dir_all(&workdir).unwrap();
    for node in ["prepare_environment", "analyze_requirements", "implement_task"] {
        fixture
            .ctx
            .store
            .save_checkpoint(
                run_id,
                node,
                serde_json::json!({
                    "node_name": node,
                    "results": {
                        "working_directory": workdir.to_string_lossy(),
                        "branch_name": "feature/task-1300",
                        "fallback_mode": false,
                        "modified_files": ["main.txt"],
                        "implementation_success": true,
                    },
                }),
            )
            .unwrap();
    }

    let bus = EventBus::new().shared();
    let orchestrator = Orchestrator::new(fixture.ctx.clone(), bus, Arc::new(NoopVectorStore));
    let dispatched = orchestrator.recover_incomplete_runs().await.unwrap();
    assert_eq!(dispatched, 1);

    let run = fixture.ctx.store.get_run(run_id).unwrap().unwrap();
    assert!(run.completed_at.is_some());

    // Nothing before run_tests was re-executed
    let steps = fixture.ctx.store.list_steps(run_id).unwrap();
    assert!(!steps.is_empty());
    assert!(steps.iter().all(|s| {
        s.node_name != "prepare_environment"
            && s.node_name != "analyze_requirements"
            && s.node_name != "implement_task"
    }));
    assert_eq!(steps[0].node_name, "run_tests");
}

// ---------------------------------------------------------------------------
// Status-transition reactivation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_transition_opens_reactivation_run() {
    let fixture = fixture_with(
        ScriptedMonday::with_replies(vec![vec!["oui"]]),
        SeqTestRunner::no_tests(),
        ScriptedLlm::coder(),
        OrchestratorConfig::default(),
    );

    // Seed the task with one completed run so the transition reactivates
    let mut seed = WorkItemEnvelope::new(1200);
    seed.title = Some("Tâche existante".to_string());
    let task_id = fixture.ctx.store.create_or_load_task(&seed).unwrap();
    let run_id = fixture
        .ctx
        .store
        .start_run(
            task_id,
            orchestration::RunParams {
                workflow_id: "w0".to_string(),
                correlation_id: "c0".to_string(),
                source_branch: "main".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    fixture
        .ctx
        .store
        .complete_task_run(run_id, WorkflowStatus::Completed, None, None)
        .unwrap();

    let bus = EventBus::new().shared();
    let orchestrator = Orchestrator::new(fixture.ctx.clone(), bus, Arc::new(NoopVectorStore));

    let mut envelope = WorkItemEnvelope::new(1200);
    envelope.title = Some("Tâche existante".to_string());
    envelope.column_values.insert(
        "repository_url".to_string(),
        orchestration::model::ColumnValue {
            text: Some("https://github.com/owner/repo".to_string()),
            ..Default::default()
        },
    );
    envelope.previous_column_values.insert(
        "status".to_string(),
        orchestration::model::ColumnValue {
            text: Some("Done".to_string()),
            ..Default::default()
        },
    );
    envelope.new_column_values.insert(
        "status".to_string(),
        orchestration::model::ColumnValue {
            text: Some("Working on it".to_string()),
            ..Default::default()
        },
    );

    let triggered = orchestrator.handle_status_transition(&envelope).await.unwrap();
    assert!(triggered);

    // The dispatched run is asynchronous; wait for it to finish
    let mut reactivated = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let runs = fixture.ctx.store.list_runs_for_task(task_id).unwrap();
        if let Some(run) = runs
            .iter()
            .find(|r| r.reactivation_count == 1 && r.completed_at.is_some())
        {
            reactivated = Some(run.clone());
            break;
        }
    }
    let reactivated = reactivated.expect("reactivation run completed");
    assert_eq!(reactivated.source_branch, "main");
    assert_eq!(reactivated.status, WorkflowStatus::Completed);
}

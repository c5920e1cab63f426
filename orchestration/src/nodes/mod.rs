//! The twelve workflow nodes.
//!
//! Each node is an async function over the shared `NodeContext` and the
//! mutable `WorkflowState`. Nodes prefer local recovery: they record
//! failures into the results channels and let routing decide, raising
//! `NodeError` only when a hard dependency is broken.

pub mod analyze;
pub mod browser_qa;
pub mod debug;
pub mod finalize;
pub mod implement;
pub mod merge;
pub mod monday_validation;
pub mod openai_debug;
pub mod prepare;
pub mod qa;
pub mod update_monday;

use std::path::PathBuf;
use std::sync::Arc;

use crate::clients::browser::BrowserQaClient;
use crate::clients::git::GitOps;
use crate::clients::github::GitHubClient;
use crate::clients::llm::LlmClient;
use crate::clients::monday::MondayClient;
use crate::clients::slack::SlackClient;
use crate::config::OrchestratorConfig;
use crate::error::NodeResult;
use crate::graph::graph::NodeName;
use crate::graph::state::WorkflowState;
use crate::queue::QueueManager;
use crate::store::SharedStore;
use crate::validation::{NotificationCoordinator, ValidationStore};

pub use test::{CommandTestRunner, TestRunner};

/// Shared handles every node executes against.
pub struct NodeContext {
    pub config: OrchestratorConfig,
    pub store: SharedStore,
    pub validations: Arc<ValidationStore>,
    pub notifier: Arc<NotificationCoordinator>,
    pub queue: Arc<QueueManager>,
    pub llm: Arc<dyn LlmClient>,
    pub git: Arc<dyn GitOps>,
    pub github: Arc<dyn GitHubClient>,
    pub monday: Arc<dyn MondayClient>,
    /// When the Monday surface is not configured, the validation gate
    /// auto-approves instead of waiting.
    pub monday_enabled: bool,
    pub slack: Arc<dyn SlackClient>,
    pub browser_qa: Arc<dyn BrowserQaClient>,
    pub test_runner: Arc<dyn TestRunner>,
    /// Root under which per-run workspaces are created.
    pub workspace_root: PathBuf,
    /// Token to embed in push remotes, when pushing is configured.
    pub github_token: Option<String>,
    /// Deployed application URL for browser QA, when available.
    pub browser_base_url: Option<String>,
}

/// Resolve a model-produced file path inside the run's workspace. Paths
/// are untrusted LLM output: absolute paths, drive prefixes and any `..`
/// component are rejected so a reply can never write outside `workdir`.
pub(crate) fn safe_workspace_path(workdir: &std::path::Path, relative: &str) -> Option<PathBuf> {
    use std::path::Component;

    let candidate = std::path::Path::new(relative);
    if relative.is_empty() || candidate.is_absolute() {
        return None;
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir))
    {
        return None;
    }
    Some(workdir.join(candidate))
}

impl NodeContext {
    /// `owner/repo` slug from the task's repository URL.
    pub fn repo_slug(url: &str) -> Option<String> {
        let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
        let mut segments = trimmed.rsplit('/');
        let repo = segments.next()?;
        let owner = segments.next()?;
        if repo.is_empty() || owner.is_empty() || owner.contains(':') {
            return None;
        }
        Some(format!("{}/{}", owner, repo))
    }
}

/// Dispatch one node by name.
pub async fn execute_node(
    node: NodeName,
    ctx: &NodeContext,
    state: &mut WorkflowState,
) -> NodeResult<()> {
    match node {
        NodeName::PrepareEnvironment => prepare::prepare_environment(ctx, state).await,
        NodeName::AnalyzeRequirements => analyze::analyze_requirements(ctx, state).await,
        NodeName::ImplementTask => implement::implement_task(ctx, state).await,
        NodeName::RunTests => test::run_tests(ctx, state).await,
        NodeName::DebugCode => debug::debug_code(ctx, state).await,
        NodeName::QualityAssuranceAutomation => qa::quality_assurance_automation(ctx, state).await,
        NodeName::BrowserQualityAssurance => browser_qa::browser_quality_assurance(ctx, state).await,
        NodeName::FinalizePr => finalize::finalize_pr(ctx, state).await,
        NodeName::MondayValidation => monday_validation::monday_validation(ctx, state).await,
        NodeName::OpenaiDebug => openai_debug::openai_debug(ctx, state).await,
        NodeName::MergeAfterValidation => merge::merge_after_validation(ctx, state).await,
        NodeName::UpdateMonday => update_monday::update_monday(ctx, state).await,
    }
}

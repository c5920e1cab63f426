//! CLI entry point: run work items from files and inspect validations.
//!
//! The webhook HTTP surface lives outside this crate; this binary covers
//! operational use — feeding a captured work-item envelope through the
//! orchestrator and inspecting the validation backlog.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use orchestration::clients::browser::NoopBrowserQa;
use orchestration::clients::git::SystemGit;
use orchestration::clients::github::HttpGitHubClient;
use orchestration::clients::llm::{AnthropicProvider, FallbackLlm, OpenAiProvider};
use orchestration::clients::monday::HttpMondayClient;
use orchestration::clients::slack::HttpSlackClient;
use orchestration::clients::vector::NoopVectorStore;
use orchestration::nodes::CommandTestRunner;
use orchestration::{
    EventBus, NodeContext, NotificationCoordinator, Orchestrator, OrchestratorConfig,
    PersistenceStore, QueueManager, ValidationStore, WorkItemEnvelope,
};

#[derive(Parser)]
#[command(name = "orchestration", about = "Autonomous development agent orchestrator")]
struct Cli {
    /// Path for the persistence store
    #[arg(long, default_value = "./orchestration-state")]
    state_path: PathBuf,

    /// Root directory for per-run workspaces
    #[arg(long, default_value = "/tmp/orchestration-workspaces")]
    workspace_root: PathBuf,

    /// Optional TOML config overlaying the environment defaults
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a work-item envelope (JSON file) through the orchestrator
    RunItem {
        /// JSON file with a work-item envelope
        file: PathBuf,
    },
    /// Process a mention envelope (JSON file with update_id + text_body)
    ProcessComment {
        file: PathBuf,
    },
    /// Resume runs left incomplete by a previous process
    Recover,
    /// List pending validations
    Validations {
        #[arg(long)]
        include_expired: bool,
    },
    /// Show validation statistics
    Stats,
}

fn build_context(cli: &Cli) -> anyhow::Result<Arc<NodeContext>> {
    let config = match &cli.config {
        Some(path) => OrchestratorConfig::from_toml_file(path)?,
        None => OrchestratorConfig::from_env(),
    };
    orchestration::init_config(config.clone());

    let store = PersistenceStore::open(&cli.state_path)?.shared();
    let validations = ValidationStore::new(store.clone()).shared();

    let openai_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let llm = Arc::new(FallbackLlm::new(
        Arc::new(OpenAiProvider::new(openai_key, "gpt-4o")),
        Arc::new(AnthropicProvider::new(anthropic_key, "claude-sonnet-4-5")),
    ));

    let monday_token = std::env::var("MONDAY_API_TOKEN").ok();
    let monday_enabled = monday_token.is_some();
    let monday = Arc::new(HttpMondayClient::new(monday_token.unwrap_or_default()));
    let slack = Arc::new(HttpSlackClient::new(
        std::env::var("SLACK_BOT_TOKEN").unwrap_or_default(),
    ));

    let notifier = Arc::new(NotificationCoordinator::new(
        slack.clone(),
        monday.clone(),
        validations.clone(),
    ));

    Ok(Arc::new(NodeContext {
        config,
        store,
        validations,
        notifier,
        queue: Arc::new(QueueManager::new()),
        llm,
        git: Arc::new(SystemGit::new()),
        github: Arc::new(HttpGitHubClient::new(
            std::env::var("GITHUB_TOKEN").unwrap_or_default(),
        )),
        monday,
        monday_enabled,
        slack,
        browser_qa: Arc::new(NoopBrowserQa),
        test_runner: Arc::new(CommandTestRunner::new()),
        workspace_root: cli.workspace_root.clone(),
        github_token: std::env::var("GITHUB_TOKEN").ok(),
        browser_base_url: std::env::var("BROWSER_QA_BASE_URL").ok(),
    }))
}

fn read_envelope(path: &PathBuf) -> anyhow::Result<WorkItemEnvelope> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = build_context(&cli)?;

    match &cli.command {
        Command::RunItem { file } => {
            let envelope = read_envelope(file)?;
            let bus = EventBus::with_persistence(ctx.store.clone()).shared();
            let orchestrator = Orchestrator::new(ctx, bus, Arc::new(NoopVectorStore));

            if orchestrator.handle_status_transition(&envelope).await? {
                info!("Status transition dispatched");
            } else {
                let request = envelope.to_task_request();
                let report = orchestrator.pool().run_work_item(request).await?;
                match report {
                    Some(report) => info!(
                        status = %report.status,
                        duration_secs = report.duration_seconds,
                        "Run finished"
                    ),
                    None => info!("Work item not admitted (duplicate or queued)"),
                }
            }
        }
        Command::ProcessComment { file } => {
            let envelope = read_envelope(file)?;
            let bus = EventBus::with_persistence(ctx.store.clone()).shared();
            let orchestrator = Orchestrator::new(ctx, bus, Arc::new(NoopVectorStore));
            let outcome = orchestrator.handle_inbound_comment(&envelope).await?;
            info!(?outcome, "Comment processed");
        }
        Command::Recover => {
            let bus = EventBus::with_persistence(ctx.store.clone()).shared();
            let orchestrator = Orchestrator::new(ctx, bus, Arc::new(NoopVectorStore));
            let dispatched = orchestrator.recover_incomplete_runs().await?;
            info!(dispatched, "Recovery finished");
        }
        Command::Validations { include_expired } => {
            for summary in ctx.validations.list_pending(*include_expired)? {
                println!(
                    "{}  {}  [{}]{}{}",
                    summary.validation_id,
                    summary.task_title,
                    summary.status,
                    if summary.is_urgent { "  URGENT" } else { "" },
                    if summary.has_test_failures {
                        "  TEST-FAILURES"
                    } else {
                        ""
                    },
                );
            }
        }
        Command::Stats => {
            let stats = ctx.validations.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

//! `prepare_environment`: provision a scratch workspace for the run.
//!
//! Clones the repository (from `source_branch` on reactivations) and checks
//! out the working branch. Failures degrade into fallback mode with a
//! minimal scaffold; this node never aborts the run.

use tracing::{info, warn};

use super::NodeContext;
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;

/// Project language detected from build files in the workspace.
fn detect_project_language(dir: &std::path::Path) -> &'static str {
    if dir.join("Cargo.toml").exists() {
        "rust"
    } else if dir.join("package.json").exists() {
        "javascript"
    } else if dir.join("requirements.txt").exists() || dir.join("pyproject.toml").exists() {
        "python"
    } else if dir.join("go.mod").exists() {
        "go"
    } else {
        "unknown"
    }
}

pub async fn prepare_environment(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let workdir = ctx
        .workspace_root
        .join(format!("run_{}", state.workflow_id));

    let branch_name = state
        .task
        .branch_name
        .clone()
        .unwrap_or_else(|| {
            if state.is_reactivation {
                format!(
                    "reactivation-{}-task-{}",
                    state.reactivation_count, state.task.task_id
                )
            } else {
                format!("feature/task-{}", state.task.task_id)
            }
        });

    let clone_branch = if state.is_reactivation {
        Some(state.source_branch.clone())
    } else {
        state.task.base_branch.clone()
    };

    let mut fallback_mode = false;
    match &state.task.repository_url {
        Some(url) => {
            info!(url = %url, branch = ?clone_branch, "Cloning repository");
            let clone = ctx
                .git
                .clone_repo(url, clone_branch.as_deref(), &workdir)
                .await;
            match clone {
                Ok(()) => {
                    if let Err(e) = ctx.git.checkout(&workdir, &branch_name, true).await {
                        warn!(error = %e, "Branch checkout failed, staying on clone branch");
                        state
                            .results
                            .push_error_log(format!("Checkout échoué: {}", e));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Clone failed, switching to fallback workspace");
                    state
                        .results
                        .push_error_log(format!("Clone échoué: {}", e));
                    fallback_mode = true;
                }
            }
        }
        None => {
            warn!("No repository URL on the task, using fallback workspace");
            fallback_mode = true;
        }
    }

    if fallback_mode {
        // Minimal scaffold so downstream nodes still have a filesystem
        if let Err(e) = std::fs::create_dir_all(&workdir) {
            state
                .results
                .push_error_log(format!("Création workspace échouée: {}", e));
        }
        state
            .results
            .push_ai_message("⚠️ Environnement dégradé - scaffold minimal utilisé");
    }

    let project_language = detect_project_language(&workdir);
    state.project_language = project_language.to_string();

    state
        .results
        .set("working_directory", workdir.to_string_lossy().to_string());
    state.results.set("branch_name", branch_name.clone());
    state.results.set("fallback_mode", fallback_mode);
    state.results.set("environment_ready", true);
    state.results.push_ai_message(format!(
        "🛠️ Environnement prêt (branche {}, langage {})",
        branch_name, project_language
    ));

    info!(
        workdir = %workdir.display(),
        branch = %branch_name,
        fallback_mode,
        "Environment prepared"
    );
    Ok(())
}

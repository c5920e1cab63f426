//! `finalize_pr`: push the working branch and persist the pull request.
//!
//! The PR row requires both task and run ids; reaching this node with
//! either missing is an invariant violation and aborts the run. Missing
//! repository data degrades instead: the node records the critical marker
//! and flags `skip_github` so routing sends the run to update-only.

use std::path::PathBuf;

use serde_json::json;
use tracing::{error, info, warn};

use super::NodeContext;
use crate::error::{NodeError, NodeResult};
use crate::graph::state::WorkflowState;

pub async fn finalize_pr(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    // Invariant: ids must have been propagated since the run opened
    if state.db_task_id.is_none() || state.db_run_id.is_none() {
        error!(
            db_task_id = ?state.db_task_id,
            db_run_id = ?state.db_run_id,
            "CRITICAL: finalize_pr reached without database ids"
        );
        return Err(NodeError::permanent(
            "finalize_pr",
            "db_task_id/db_run_id missing at PR creation",
        ));
    }

    let Some(repo_url) = state.task.repository_url.clone() else {
        warn!("Repository URL missing, skipping GitHub");
        state
            .results
            .push_error_log("❌ URL du repository non définie".to_string());
        state.results.set("skip_github", true);
        return Ok(());
    };
    let Some(workdir) = state.working_directory().map(PathBuf::from) else {
        state
            .results
            .push_error_log("❌ Répertoire de travail non défini".to_string());
        state.results.set("skip_github", true);
        return Ok(());
    };
    let Some(branch) = state.branch_name().map(String::from) else {
        state
            .results
            .push_error_log("❌ Branche Git non définie".to_string());
        state.results.set("skip_github", true);
        return Ok(());
    };

    if state.results.get_bool("fallback_mode") {
        warn!("Fallback workspace has no git history, skipping GitHub");
        state.results.set("skip_github", true);
        state
            .results
            .push_ai_message("⚠️ Mode dégradé - pas de push GitHub".to_string());
        return Ok(());
    }

    // Verify there is something to commit before touching the remote
    if let Err(e) = ctx.git.add_all(&workdir).await {
        state
            .results
            .push_error_log(format!("git add échoué: {}", e));
        state.results.set("skip_github", true);
        return Ok(());
    }
    let staged = match ctx.git.diff_names_cached(&workdir).await {
        Ok(staged) => staged,
        Err(e) => {
            state
                .results
                .push_error_log(format!("git diff échoué: {}", e));
            state.results.set("skip_github", true);
            return Ok(());
        }
    };
    if staged.is_empty() {
        warn!("No staged changes, skipping PR");
        state.results.set("skip_github", true);
        state
            .results
            .push_ai_message("⚠️ Aucun changement à pousser".to_string());
        return Ok(());
    }

    let commit_message = format!("{}\n\nTask: {}", state.task.title, state.task.task_id);
    let head_sha = match ctx.git.commit(&workdir, &commit_message).await {
        Ok(sha) => sha,
        Err(e) => {
            state
                .results
                .push_error_log(format!("git commit échoué: {}", e));
            state.results.set("skip_github", true);
            return Ok(());
        }
    };

    let remote_url = match &ctx.github_token {
        Some(token) => repo_url.replacen("https://", &format!("https://x-access-token:{}@", token), 1),
        None => repo_url.clone(),
    };
    if let Err(e) = ctx.git.push(&workdir, &branch, &remote_url).await {
        if e.is_transient() {
            return Err(NodeError::transient("finalize_pr", e.to_string()));
        }
        state
            .results
            .push_error_log(format!("git push échoué: {}", e));
        state.results.set("skip_github", true);
        return Ok(());
    }

    let Some(repo_slug) = NodeContext::repo_slug(&repo_url) else {
        state
            .results
            .push_error_log(format!("URL de repository invalide: {}", repo_url));
        state.results.set("skip_github", true);
        return Ok(());
    };

    let base_branch = state
        .task
        .base_branch
        .clone()
        .unwrap_or_else(|| "main".to_string());
    let pr_body = format!(
        "## {}\n\n{}\n\nFichiers modifiés:\n{}",
        state.task.title,
        state.task.description,
        state
            .results
            .modified_files()
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n"),
    );

    let pr = match ctx
        .github
        .create_pr(&repo_slug, &state.task.title, &pr_body, &branch, &base_branch)
        .await
    {
        Ok(pr) => pr,
        Err(e) => {
            if e.is_transient() {
                return Err(NodeError::transient("finalize_pr", e.to_string()));
            }
            state
                .results
                .push_error_log(format!("Création PR échouée: {}", e));
            state.results.set("skip_github", true);
            return Ok(());
        }
    };

    // The write that enforces the id invariant at the boundary
    ctx.store
        .create_pull_request(
            state.db_task_id,
            state.db_run_id,
            pr.number,
            &pr.url,
            &pr.title,
            pr.head_sha.as_deref().or(Some(head_sha.as_str())),
            &base_branch,
            &branch,
        )
        .map_err(|e| NodeError::permanent("finalize_pr", e.to_string()))?;

    state.results.set(
        "pr_info",
        json!({
            "number": pr.number,
            "title": pr.title,
            "url": pr.url,
            "pr_url": pr.url,
            "branch": branch,
            "base_branch": base_branch,
        }),
    );
    state.results.set("pr_url", pr.url.clone());
    state
        .results
        .push_ai_message(format!("🔀 Pull request #{} créée: {}", pr.number, pr.url));

    info!(number = pr.number, url = %pr.url, "Pull request finalized");
    Ok(())
}

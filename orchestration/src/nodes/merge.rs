//! `merge_after_validation`: merge the approved pull request.

use serde_json::json;
use tracing::{info, warn};

use super::NodeContext;
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;
use crate::validation::{ActionStatus, ActionType};

pub async fn merge_after_validation(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let Some(pr_info) = state.results.get("pr_info").cloned() else {
        warn!("Merge requested without a pull request");
        state
            .results
            .push_error_log("Merge demandé sans pull request".to_string());
        state.results.set("merge_successful", false);
        state.results.set("monday_final_status", "Working on it");
        return Ok(());
    };
    let number = pr_info["number"].as_i64().unwrap_or_default();
    let pr_url = pr_info["url"].as_str().unwrap_or_default().to_string();

    let Some(repo_slug) = state
        .task
        .repository_url
        .as_deref()
        .and_then(NodeContext::repo_slug)
    else {
        state
            .results
            .push_error_log("Repository invalide pour le merge".to_string());
        state.results.set("merge_successful", false);
        return Ok(());
    };

    let validation_id = state.results.get_str("validation_id").map(String::from);
    let action_id = match &validation_id {
        Some(id) => match ctx
            .validations
            .create_action(id, ActionType::MergePr, Some(json!({"number": number})))
        {
            Ok(action_id) => {
                let _ = ctx.validations.update_action(
                    id,
                    action_id,
                    ActionStatus::InProgress,
                    None,
                    None,
                    None,
                );
                Some(action_id)
            }
            Err(e) => {
                warn!(error = %e, "Merge action row failed");
                None
            }
        },
        None => None,
    };

    let merge_message = format!("Merge: {} (task {})", state.task.title, state.task.task_id);
    match ctx
        .github
        .merge_pr(&repo_slug, number, "squash", &merge_message)
        .await
    {
        Ok(merge_sha) => {
            info!(number, sha = %merge_sha, "Pull request merged");
            state.results.set("merge_successful", true);
            state.results.set("merge_commit_hash", merge_sha.clone());
            state
                .results
                .push_ai_message(format!("🎉 PR #{} mergée ({})", number, merge_sha));

            if let Some(run_id) = state.db_run_id {
                if let Err(e) = ctx.store.mark_pull_request_merged(run_id, Some(&merge_sha)) {
                    warn!(error = %e, "PR row merge update failed");
                }
                if let Err(e) = ctx.store.update_last_merged_pr_url(run_id, &pr_url) {
                    warn!(error = %e, "Last merged PR mirror failed");
                }
            }

            if let (Some(id), Some(action_id)) = (&validation_id, action_id) {
                let _ = ctx.validations.update_action(
                    id,
                    action_id,
                    ActionStatus::Completed,
                    Some(json!({"merged": true})),
                    None,
                    Some(&merge_sha),
                );
            }
        }
        Err(e) => {
            warn!(number, error = %e, "Merge failed");
            state.results.set("merge_successful", false);
            state
                .results
                .push_error_log(format!("Merge de la PR #{} échoué: {}", number, e));
            state.results.set("monday_final_status", "Working on it");

            if let (Some(id), Some(action_id)) = (&validation_id, action_id) {
                let _ = ctx.validations.update_action(
                    id,
                    action_id,
                    ActionStatus::Failed,
                    None,
                    Some(&e.to_string()),
                    None,
                );
            }
        }
    }
    Ok(())
}

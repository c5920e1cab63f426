//! `monday_validation`: the human-in-the-loop gate.
//!
//! Prepares a results summary, opens a validation request, posts it on the
//! Monday item, suspends the queue slot and hands the wait to the
//! notification coordinator. On timeout the auto-approve policy applies:
//! approve only when the last test run was green, no errors were logged and
//! files were actually modified.

use serde_json::json;
use tracing::{info, warn};

use super::NodeContext;
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;
use crate::validation::{
    ValidationRequest, ValidationStatus, ValidationWaitParams,
};

pub async fn monday_validation(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    if !ctx.monday_enabled {
        info!("Monday surface not configured, auto-approving validation");
        state.results.set("human_decision", "approved");
        state.results.set("should_merge", true);
        state.results.set("human_validation_status", "approved");
        state
            .results
            .push_ai_message("💡 Monday non configuré - validation automatiquement approuvée");
        return Ok(());
    }

    // Each visit to this gate is its own validation round; earlier rounds
    // stay resolved in the store
    let round = state.results.get_u32("validation_round") + 1;
    state.results.set("validation_round", round);
    let validation_id = format!("{}-validation-{}", state.workflow_id, round);
    let modified_files = state.results.modified_files();
    let code_summary = state
        .results
        .get_str("code_summary")
        .map(String::from)
        .unwrap_or_else(|| format!("{} fichier(s) modifié(s)", modified_files.len()));

    let last_test = state.results.last_test_report();
    let request = ValidationRequest::new(
        validation_id.clone(),
        state.db_task_id.unwrap_or_default(),
        state.workflow_id.clone(),
        state.task.title.clone(),
        state.task.description.clone(),
        code_summary.clone(),
        state.results.get("code_changes"),
        state
            .results
            .get("modified_files")
            .unwrap_or(&serde_json::Value::Null),
    )
    .with_run(state.db_run_id, state.current_step_id)
    .with_test_results(
        last_test
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok())
            .as_ref(),
    )
    .with_pr_info(state.results.get("pr_info"));

    // Best-effort: a failed write must not stall the gate
    let created = ctx
        .validations
        .create_request(request, Some(&validation_id));
    if !created {
        warn!("Validation request not persisted, continuing with in-flight wait");
    }
    state.results.set("validation_id", validation_id.clone());

    let monday_item_id = state.task.monday_item_id.unwrap_or_default();
    let message = build_validation_message(state, &code_summary, &modified_files);
    let update_id = match ctx.monday.post_update(monday_item_id, &message).await {
        Ok(update_id) => update_id,
        Err(e) => {
            warn!(error = %e, "Validation post failed");
            state
                .results
                .push_error_log(format!("Publication validation échouée: {}", e));
            state.results.set("human_decision", "error");
            return Ok(());
        }
    };
    state.results.set("validation_update_id", update_id.clone());

    if let (Some(queue_id), Some(external_id)) = (&state.queue_id, state.task.monday_item_id) {
        if let Err(e) = ctx.queue.mark_waiting_validation(external_id, queue_id) {
            warn!(error = %e, "Queue suspension failed");
        }
    }

    // Resolve the requester's Slack id through their Monday email
    let (user_slack_id, user_email) = resolve_slack_user(ctx, monday_item_id).await;

    let is_command = state.is_reactivation || state.task.run_id.is_some();
    let reminder_delay = if is_command {
        ctx.config.validation_reminder_secs.map(std::time::Duration::from_secs)
    } else {
        None
    };

    let pr_url = state.results.get_str("pr_url").map(String::from);
    let params = ValidationWaitParams {
        validation_id: validation_id.clone(),
        update_id,
        user_slack_id: user_slack_id.clone(),
        user_email,
        task_title: state.task.title.clone(),
        task_id: state
            .db_task_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
        external_item_id: monday_item_id,
        pr_url: pr_url.clone(),
        reminder_delay,
        final_timeout: ctx.config.validation_timeout(is_command),
        is_command,
        prior_rejection_count: state.results.get_u32("rejection_count"),
    };

    let response = ctx.notifier.wait_for_validation(&params).await;

    match response {
        None => apply_timeout_policy(state),
        Some(response) => {
            let status = response.status;
            state
                .results
                .set("human_validation_status", status.to_string());

            match status {
                ValidationStatus::Approved => {
                    info!("Code approved by human");
                    state.results.set("human_decision", "approved");
                    state.results.set("should_merge", true);
                    state
                        .results
                        .push_ai_message("✅ Code approuvé - Préparation du merge...");

                    if let Some(user) = &user_slack_id {
                        let text = format!(
                            "✅ Validation approuvée: *{}*{}",
                            state.task.title,
                            pr_url
                                .as_deref()
                                .map(|u| format!("\nPR: {}", u))
                                .unwrap_or_default()
                        );
                        if let Err(e) = ctx.slack.post_message(user, &text).await {
                            warn!(error = %e, "Success notification failed");
                        }
                    }
                }
                ValidationStatus::Rejected => {
                    state.results.set("should_merge", false);
                    state
                        .results
                        .set("rejection_count", response.rejection_count);

                    if response.should_retry_workflow
                        && response.modification_instructions.is_some()
                    {
                        let instructions =
                            response.modification_instructions.clone().unwrap_or_default();
                        info!(
                            rejection_count = response.rejection_count,
                            "Rejection with modification instructions"
                        );
                        state.results.set("human_decision", "rejected_with_retry");
                        state
                            .results
                            .set("modification_instructions", instructions.clone());
                        state.results.set("should_retry_workflow", true);
                        post_reimplementation_notice(ctx, state, monday_item_id, &instructions)
                            .await;
                    } else if response.should_retry_workflow {
                        info!("Human requested debug pass");
                        state.results.set("human_decision", "debug");
                    } else {
                        info!("Code rejected");
                        state.results.set("human_decision", "rejected");
                        state
                            .results
                            .push_ai_message("❌ Code rejeté par le relecteur humain");
                    }
                }
                ValidationStatus::Cancelled => {
                    warn!("Workflow abandoned by human");
                    state.results.set("human_decision", "abandoned");
                    state.results.set("should_merge", false);
                }
                ValidationStatus::Expired => {
                    state.results.set("human_decision", "timeout");
                    state.results.set("should_merge", false);
                }
                ValidationStatus::Pending | ValidationStatus::Abandoned => {
                    state.results.set("human_decision", "error");
                    state.results.set("should_merge", false);
                }
            }
        }
    }
    Ok(())
}

/// Auto-approve on timeout iff tests are green, no errors were logged and
/// files were modified; otherwise record the timeout with its reason.
fn apply_timeout_policy(state: &mut WorkflowState) {
    warn!("Final validation timeout reached, applying automatic policy");

    let has_tests_success = state
        .results
        .last_test_report()
        .map(|t| t.success)
        .unwrap_or(true);
    let has_critical_error = !state.results.error_logs().is_empty();
    let has_modified_files = !state.results.modified_files().is_empty();

    let auto_approve = has_tests_success && !has_critical_error && has_modified_files;

    if auto_approve {
        info!("Automatic validation approved");
        state.results.set("human_decision", "approve_auto");
        state.results.set("should_merge", true);
        state.results.set("auto_approved", true);
        state.results.set(
            "monday_validation",
            json!({
                "human_decision": "approve_auto",
                "timeout": true,
                "auto_approved": true,
                "reason": "Tests passent, pas d'erreur critique, fichiers modifiés",
            }),
        );
        state
            .results
            .push_ai_message("✅ Validation automatique: Critères de qualité remplis");
    } else {
        warn!(
            has_tests_success,
            has_critical_error, has_modified_files, "Automatic validation refused"
        );
        state.results.set("human_decision", "timeout");
        state.results.set("auto_approved", false);
        state.results.set(
            "monday_validation",
            json!({
                "human_decision": "timeout",
                "timeout": true,
                "auto_approved": false,
                "reason": format!(
                    "Tests: {}, Erreurs: {}, Fichiers: {}",
                    has_tests_success, has_critical_error, has_modified_files
                ),
            }),
        );
        state
            .results
            .push_ai_message("⚠️ Validation expirée - update Monday.com seulement");
    }
}

fn build_validation_message(
    state: &WorkflowState,
    code_summary: &str,
    modified_files: &[String],
) -> String {
    let mut message = format!(
        "✅ Validation requise\n\n**Tâche**: {}\n**Résumé**: {}\n**Fichiers modifiés**: {}\n",
        state.task.title,
        code_summary,
        if modified_files.is_empty() {
            "aucun".to_string()
        } else {
            modified_files.join(", ")
        },
    );
    if let Some(report) = state.results.last_test_report() {
        if report.total_tests > 0 {
            message.push_str(&format!(
                "**Tests**: {}/{} réussis\n",
                report.passed_tests, report.total_tests
            ));
        } else {
            message.push_str("**Tests**: aucun test trouvé\n");
        }
    }
    if let Some(pr_url) = state.results.get_str("pr_url") {
        message.push_str(&format!("**PR**: {}\n", pr_url));
    }
    message.push_str("\nRépondez **oui** pour approuver et merger, **non** pour rejeter, **debug** pour lancer une correction.");
    message
}

async fn resolve_slack_user(
    ctx: &NodeContext,
    monday_item_id: i64,
) -> (Option<String>, Option<String>) {
    let email = match ctx.monday.get_item_info(monday_item_id).await {
        Ok(info) => info.creator_email,
        Err(e) => {
            warn!(error = %e, "Item info lookup failed");
            None
        }
    };
    let Some(email) = email else {
        return (None, None);
    };
    match ctx.slack.lookup_user_by_email(&email).await {
        Ok(Some(user_id)) => (Some(user_id), Some(email)),
        Ok(None) => {
            warn!(email = %email, "No Slack account for requester");
            (None, Some(email))
        }
        Err(e) => {
            warn!(error = %e, "Slack lookup failed");
            (None, Some(email))
        }
    }
}

/// Announce the reimplementation exactly once; the flag suppresses the
/// standard completion comment later in the run.
async fn post_reimplementation_notice(
    ctx: &NodeContext,
    state: &mut WorkflowState,
    monday_item_id: i64,
    instructions: &str,
) {
    if state.results.get_bool("reimplementation_message_posted") {
        return;
    }
    let body = format!(
        "🤖 **RÉACTIVATION**\n\nRejet avec instructions - nouvelle implémentation en cours.\nInstructions: {}",
        instructions
    );
    match ctx.monday.post_update(monday_item_id, &body).await {
        Ok(_) => {
            state.results.set("reimplementation_message_posted", true);
        }
        Err(e) => warn!(error = %e, "Reimplementation notice failed"),
    }
}

//! `update_monday`: final node — status propagation and queue release.
//!
//! The status rule is authoritative: a successful merge forces "Done",
//! an explicit final status wins next, a PR without merge is
//! "Working on it", an error is "Stuck".

use serde_json::json;
use tracing::{info, warn};

use super::NodeContext;
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;
use crate::model::TaskStatus;
use crate::store::PerformanceMetrics;

/// Final Monday status plus the success level used for the comment header.
pub(crate) fn determine_final_status(state: &WorkflowState) -> (&'static str, &'static str) {
    if state.results.get_bool("merge_successful") {
        return ("Done", "success");
    }
    if let Some(explicit) = state.results.get_str("monday_final_status") {
        return match explicit {
            "Done" => ("Done", "success"),
            "Stuck" => ("Stuck", "failed"),
            _ => ("Working on it", "partial"),
        };
    }
    if state.results.get_str("error").is_some() || !state.results.error_logs().is_empty() {
        if state.results.contains("pr_info") {
            return ("Working on it", "partial");
        }
        return ("Stuck", "failed");
    }
    ("Working on it", "partial")
}

fn completion_comment(state: &WorkflowState, success_level: &str) -> String {
    let creator_tag = state
        .task
        .creator_name
        .as_deref()
        .map(|name| format!("@{} ", name))
        .unwrap_or_default();

    let header = match success_level {
        "success" => format!("{}✅ **Tâche Complétée**\n\n", creator_tag),
        "partial" => format!("{}⚠️ **Tâche Partiellement Complétée**\n\n", creator_tag),
        _ => format!("{}❌ **Tâche Échouée**\n\n", creator_tag),
    };

    let mut message = format!("{}**Tâche**: {}\n\n", header, state.task.title);

    if let Some(pr_info) = state.results.get("pr_info") {
        if let Some(pr_url) = pr_info["pr_url"].as_str().or(pr_info["url"].as_str()) {
            if state.results.get_bool("merge_successful") {
                message.push_str(&format!("- **PR mergée**: {}\n", pr_url));
            } else {
                message.push_str(&format!("- **PR créée**: {}\n", pr_url));
            }
        }
    }

    if let Some(browser_qa) = state.results.get("browser_qa") {
        if browser_qa["executed"].as_bool() == Some(true) {
            message.push_str("\n**🌐 Browser QA:**\n");
            let total = browser_qa["tests_executed"].as_u64().unwrap_or(0);
            let passed = browser_qa["tests_passed"].as_u64().unwrap_or(0);
            let failed = browser_qa["tests_failed"].as_u64().unwrap_or(0);
            if browser_qa["success"].as_bool() == Some(true) {
                message.push_str(&format!("- ✅ {}/{} tests passed\n", passed, total));
            } else {
                message.push_str(&format!("- ⚠️ {}/{} tests failed\n", failed, total));
            }
            if let Some(errors) = browser_qa["console_errors"].as_array() {
                if !errors.is_empty() {
                    message.push_str(&format!("- 🐛 {} console error(s)\n", errors.len()));
                }
            }
            if let Some(screenshots) = browser_qa["screenshots"].as_array() {
                if !screenshots.is_empty() {
                    message.push_str(&format!("- 📸 {} screenshot(s)\n", screenshots.len()));
                }
            }
        }
    }

    if let Some(report) = state.results.last_test_report() {
        if report.total_tests > 0 {
            message.push_str(&format!(
                "- **Tests**: {}/{} réussis\n",
                report.passed_tests, report.total_tests
            ));
        }
    }

    message
}

pub async fn update_monday(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let (final_status, success_level) = determine_final_status(state);
    info!(final_status, success_level, "Final status determined");

    let monday_item_id = state.task.monday_item_id.unwrap_or_default();

    if ctx.monday_enabled {
        if let Err(e) = ctx
            .monday
            .update_column_value(monday_item_id, "status", final_status)
            .await
        {
            // Status propagation is best-effort: the run still completes
            warn!(error = %e, "Status column update failed");
            state
                .results
                .push_error_log(format!("Mise à jour statut Monday échouée: {}", e));
        }

        // The reimplementation notice already informed the user; do not
        // stack a standard completion comment on top of it
        let skip_comment = state.results.get_bool("reimplementation_message_posted")
            && !state.results.get_bool("merge_successful");
        if !skip_comment {
            let comment = completion_comment(state, success_level);
            match ctx.monday.post_update(monday_item_id, &comment).await {
                Ok(update_id) => {
                    state.results.set("completion_update_id", update_id);
                }
                Err(e) => {
                    warn!(error = %e, "Completion comment failed");
                    state
                        .results
                        .push_error_log(format!("Commentaire final échoué: {}", e));
                }
            }
        }

        // Mirror the merged PR into the configured repository column
        if let (Some(column_id), true) = (
            &ctx.config.monday_repository_url_column_id,
            state.results.get_bool("merge_successful"),
        ) {
            if let Some(pr_url) = state.results.get_str("pr_url") {
                if let Err(e) = ctx
                    .monday
                    .update_column_value(monday_item_id, column_id, pr_url)
                    .await
                {
                    warn!(error = %e, "Repository URL column update failed");
                }
            }
        }
    }

    let success = success_level == "success";
    state.results.set("monday_final_status", final_status);
    state.results.set("success", success);
    state.results.set(
        "current_status",
        if success || success_level == "partial" {
            "completed"
        } else {
            "failed"
        },
    );

    if let (Some(task_id), Some(run_id)) = (state.db_task_id, state.db_run_id) {
        let qa_score = state
            .results
            .get("quality_assurance")
            .and_then(|qa| qa["overall_score"].as_u64())
            .map(|s| s as u32);
        let metrics = PerformanceMetrics {
            duration_seconds: (chrono::Utc::now() - state.started_at).num_milliseconds() as f64
                / 1000.0,
            nodes_executed: state.completed_nodes.len() as u32 + 1,
            files_modified: state.results.modified_files().len() as u32,
            tests_executed: state
                .results
                .last_test_report()
                .map(|t| t.total_tests)
                .unwrap_or(0),
            debug_attempts: state.results.debug_attempts(),
            qa_score,
            auto_approved: state.results.get_bool("auto_approved"),
        };
        if let Err(e) = ctx.store.record_performance_metrics(task_id, run_id, &metrics) {
            warn!(error = %e, "Metrics persistence failed");
        }
        let task_status = if success {
            TaskStatus::Completed
        } else if success_level == "partial" {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if let Err(e) = ctx
            .store
            .update_task_status(task_id, task_status, Some(final_status))
        {
            warn!(error = %e, "Task status update failed");
        }
    }

    // Release the queue slot; a waiting request surfaces for resubmission
    if let (Some(queue_id), Some(external_id)) = (&state.queue_id, state.task.monday_item_id) {
        let released = if success_level == "failed" {
            ctx.queue.mark_failed(
                external_id,
                queue_id,
                state.results.get_str("error").unwrap_or("workflow failed"),
            )
        } else {
            ctx.queue.mark_completed(external_id, queue_id)
        };
        match released {
            Ok(Some(next)) => {
                info!(external_id, "Queued request surfaced for resubmission");
                state.results.set(
                    "next_queued_request",
                    serde_json::to_value(&next.request).unwrap_or_default(),
                );
                state.results.set("next_queue_id", next.queue_id);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Queue release failed"),
        }
    }

    state
        .results
        .push_ai_message(format!("🏁 Statut final Monday: {}", final_status));
    state.results.set(
        "final_summary",
        json!({
            "status": final_status,
            "success_level": success_level,
            "nodes": state.completed_nodes.clone(),
        }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskRequest;

    fn state() -> WorkflowState {
        WorkflowState::new(TaskRequest::new("1", "t"), "wf", Some(1), Some(1), None)
    }

    #[test]
    fn test_merge_forces_done() {
        let mut s = state();
        s.results.set("merge_successful", true);
        // Even with a contradicting explicit hint
        s.results.set("monday_final_status", "Stuck");
        assert_eq!(determine_final_status(&s), ("Done", "success"));
    }

    #[test]
    fn test_explicit_status_wins_without_merge() {
        let mut s = state();
        s.results.set("monday_final_status", "Stuck");
        assert_eq!(determine_final_status(&s), ("Stuck", "failed"));
    }

    #[test]
    fn test_pr_without_merge_is_working_on_it() {
        let mut s = state();
        s.results.set("pr_info", serde_json::json!({"url": "u"}));
        s.results.push_error_log("minor issue");
        assert_eq!(determine_final_status(&s), ("Working on it", "partial"));
    }

    #[test]
    fn test_error_without_pr_is_stuck() {
        let mut s = state();
        s.results.set("error", "clone failed");
        assert_eq!(determine_final_status(&s), ("Stuck", "failed"));
    }

    #[test]
    fn test_comment_headers() {
        let mut s = state();
        s.task.creator_name = Some("alex".to_string());
        s.results.set("merge_successful", true);
        s.results
            .set("pr_info", serde_json::json!({"url": "https://x/pull/1"}));

        let comment = completion_comment(&s, "success");
        assert!(comment.starts_with("@alex ✅"));
        assert!(comment.contains("PR mergée"));
    }
}

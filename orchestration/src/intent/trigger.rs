//! Workflow reactivation from a command-type comment.
//!
//! Synthesizes a fresh task request by copying the stored task and
//! overlaying the requirements extracted by the classifier, opens a pending
//! run bound to the triggering update, and posts a confirmation comment.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::classifier::UpdateIntent;
use crate::clients::monday::MondayClient;
use crate::error::StoreResult;
use crate::model::{TaskPriority, TaskRequest, TaskType};
use crate::store::{SharedStore, TaskRecord};

/// A reactivation ready for worker submission.
#[derive(Debug, Clone)]
pub struct PreparedReactivation {
    pub request: TaskRequest,
    pub run_id: i64,
    pub priority: u8,
}

/// Builds reactivation runs out of classified updates.
pub struct WorkflowTrigger {
    store: SharedStore,
    monday: Arc<dyn MondayClient>,
}

impl WorkflowTrigger {
    pub fn new(store: SharedStore, monday: Arc<dyn MondayClient>) -> Self {
        Self { store, monday }
    }

    /// Copy the stored task, overlay extracted requirements, open a pending
    /// run referencing the update, and post the confirmation comment.
    pub async fn prepare_reactivation(
        &self,
        task: &TaskRecord,
        intent: &UpdateIntent,
        cleaned_text: &str,
        update_id: &str,
    ) -> StoreResult<PreparedReactivation> {
        let previous_runs = self.store.list_runs_for_task(task.task_id)?;
        let reactivation_count = previous_runs
            .iter()
            .map(|r| r.reactivation_count)
            .max()
            .map(|c| c + 1)
            .unwrap_or(1);

        let run_id =
            self.store
                .create_pending_run(task.task_id, Some(update_id), reactivation_count)?;

        let mut request = TaskRequest::new(task.external_id.to_string(), task.title.clone());
        request.description = task.description.clone();
        request.task_type = task.task_type;
        request.priority = task.priority;
        request.repository_url = task.repository_url.clone();
        request.monday_item_id = Some(task.external_id);
        request.board_id = task.board_id;
        request.task_db_id = Some(task.task_id);
        request.run_id = Some(run_id);
        request.creator_name = task.creator_name.clone();
        request.creator_id = task.creator_id;
        request.is_reactivation = true;
        request.reactivation_context = Some(cleaned_text.to_string());
        request.reactivation_count = reactivation_count;
        request.source_branch = "main".to_string();
        request.task_context = Some(HashMap::new());

        if let Some(extracted) = &intent.extracted_requirements {
            if let Some(title) = &extracted.title {
                if !title.is_empty() {
                    request.title = title.clone();
                }
            }
            if let Some(description) = &extracted.description {
                if !description.is_empty() {
                    request.description = description.clone();
                }
            }
            if let Some(task_type) = &extracted.task_type {
                request.task_type = TaskType::parse_lenient(task_type);
            }
            if let Some(priority) = &extracted.priority {
                request.priority = TaskPriority::parse_lenient(priority);
            }
            if !extracted.files_mentioned.is_empty() {
                request.files_to_modify = Some(extracted.files_mentioned.clone());
            }
        }
        // The comment itself is the authoritative description when the
        // classifier extracted nothing
        if request.description.is_empty() {
            request.description = cleaned_text.to_string();
        }

        let priority = request.priority.submission_priority();
        info!(
            task_id = task.task_id,
            run_id, reactivation_count, priority, "Reactivation prepared"
        );

        self.post_confirmation(task, &request).await;

        Ok(PreparedReactivation {
            request,
            run_id,
            priority,
        })
    }

    async fn post_confirmation(&self, task: &TaskRecord, request: &TaskRequest) {
        let body = format!(
            "🤖 **RÉACTIVATION DU WORKFLOW**\n\nDemande prise en compte: {}\nPriorité: {}\nUn nouveau run démarre.",
            request.title, request.priority
        );
        if let Err(e) = self.monday.post_update(task.external_id, &body).await {
            // Confirmation is informational; the run proceeds regardless
            warn!(error = %e, "Confirmation comment failed");
        }
    }
}

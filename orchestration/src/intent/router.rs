//! Routing of classified updates: direct answer or workflow reactivation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::classifier::{TaskContext, UpdateIntent};
use super::trigger::WorkflowTrigger;
use crate::clients::llm::{CompletionRequest, LlmClient};
use crate::clients::monday::MondayClient;
use crate::model::TaskRequest;
use crate::store::{SharedStore, TaskRecord};

/// Confidence above which a non-workflow classification is answered
/// directly instead of reactivating the workflow.
const DIRECT_ANSWER_CONFIDENCE: f64 = 0.7;

/// Sink for prepared reactivations; the orchestrator's worker pool
/// implements this.
#[async_trait]
pub trait WorkSubmitter: Send + Sync {
    async fn submit(&self, request: TaskRequest, priority: u8) -> anyhow::Result<()>;
}

/// What the router did with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Answered in place; no run was created.
    QuestionAnswered { reply_update_id: String },
    /// A reactivation run was created and submitted.
    CommandWorkflow { run_id: i64, priority: u8 },
}

/// Routes classified updates to an answer or a reactivation.
pub struct UpdateRouter {
    llm: Arc<dyn LlmClient>,
    monday: Arc<dyn MondayClient>,
    store: SharedStore,
    trigger: WorkflowTrigger,
    submitter: Arc<dyn WorkSubmitter>,
}

impl UpdateRouter {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        monday: Arc<dyn MondayClient>,
        store: SharedStore,
        submitter: Arc<dyn WorkSubmitter>,
    ) -> Self {
        let trigger = WorkflowTrigger::new(store.clone(), monday.clone());
        Self {
            llm,
            monday,
            store,
            trigger,
            submitter,
        }
    }

    /// Route one classified update. The update trigger row is recorded in
    /// both branches; only the command branch fills its run id.
    pub async fn route(
        &self,
        intent: &UpdateIntent,
        task: &TaskRecord,
        context: &TaskContext,
        cleaned_text: &str,
        update_id: &str,
        retrieval_context: &[String],
    ) -> anyhow::Result<RouteOutcome> {
        let trigger_id = self.store.create_update_trigger(
            task.task_id,
            update_id,
            &intent.intent.to_string(),
            intent.confidence,
        )?;

        if !intent.requires_workflow && intent.confidence > DIRECT_ANSWER_CONFIDENCE {
            let reply_update_id = self
                .answer_question(task, context, cleaned_text, retrieval_context)
                .await?;
            self.store.mark_trigger_processed(trigger_id, None)?;
            info!(task_id = task.task_id, "Question answered, no run created");
            return Ok(RouteOutcome::QuestionAnswered { reply_update_id });
        }

        let prepared = self
            .trigger
            .prepare_reactivation(task, intent, cleaned_text, update_id)
            .await?;
        self.store
            .mark_trigger_processed(trigger_id, Some(prepared.run_id))?;

        let run_id = prepared.run_id;
        let priority = prepared.priority;
        self.submitter.submit(prepared.request, priority).await?;

        info!(task_id = task.task_id, run_id, priority, "Command routed to workflow");
        Ok(RouteOutcome::CommandWorkflow { run_id, priority })
    }

    /// Compose a reply with the LLM and post it under the item.
    async fn answer_question(
        &self,
        task: &TaskRecord,
        context: &TaskContext,
        question: &str,
        retrieval_context: &[String],
    ) -> anyhow::Result<String> {
        let mut prompt = format!(
            "Tu es l'assistant de développement du projet.\n\nTâche: {}\nStatut: {}\nDescription: {}\n\nQuestion de l'utilisateur:\n{}\n\nRéponds de manière concise et utile, dans la langue de la question.",
            context.task_title, context.task_status, context.original_description, question
        );
        if !retrieval_context.is_empty() {
            prompt.push_str("\n\nContexte de conversations précédentes:\n");
            for snippet in retrieval_context.iter().take(5) {
                prompt.push_str(&format!("- {}\n", snippet));
            }
        }

        let answer = match self
            .llm
            .complete(&CompletionRequest::new(prompt).with_max_tokens(1000))
            .await
        {
            Ok(completion) => completion.content,
            Err(e) => {
                warn!(error = %e, "Answer generation failed, posting apology");
                "Je n'ai pas pu générer de réponse pour le moment. Merci de réessayer.".to_string()
            }
        };

        let body = format!("🤖 **Réponse VyData**\n\n{}", answer);
        let reply_update_id = self.monday.post_update(task.external_id, &body).await?;
        Ok(reply_update_id)
    }
}

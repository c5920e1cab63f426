//! `analyze_requirements`: structured LLM analysis of the task.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::NodeContext;
use crate::clients::llm::{strip_json_fences, CompletionRequest};
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;
use crate::store::LlmInteractionRecord;

pub async fn analyze_requirements(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let task = &state.task;
    let prompt = format!(
        "Analyse cette tâche de développement et réponds en JSON uniquement.\n\n\
         Titre: {}\nDescription: {}\nType: {}\nPriorité: {}\nLangage projet: {}\n\
         Critères d'acceptation: {}\n\n\
         JSON attendu: {{\"complexity\": \"low|medium|high\", \"estimated_files\": [\"path\"], \
         \"plan\": [\"étape\"], \"risks\": [\"risque\"]}}",
        task.title,
        task.description,
        task.task_type,
        task.priority,
        state.project_language,
        task.acceptance_criteria.as_deref().unwrap_or("N/A"),
    );

    let analysis = match ctx
        .llm
        .complete(&CompletionRequest::new(prompt.clone()).with_max_tokens(2000))
        .await
    {
        Ok(completion) => {
            if let Some(step_id) = state.current_step_id {
                let _ = ctx.store.log_llm_interaction(LlmInteractionRecord {
                    interaction_id: 0,
                    step_id,
                    provider: completion.provider_used.clone(),
                    model: completion.model.clone(),
                    prompt,
                    response: completion.content.clone(),
                    prompt_tokens: completion.input_tokens,
                    completion_tokens: completion.output_tokens,
                    latency_ms: completion.latency_ms,
                    cost_estimate: None,
                    created_at: Utc::now(),
                });
            }

            serde_json::from_str::<serde_json::Value>(strip_json_fences(&completion.content))
                .unwrap_or_else(|_| {
                    warn!("Analysis reply unparseable, using basic analysis");
                    basic_analysis(state)
                })
        }
        Err(e) => {
            warn!(error = %e, "Analysis LLM failed, using basic analysis");
            state
                .results
                .push_error_log(format!("Analyse LLM indisponible: {}", e));
            basic_analysis(state)
        }
    };

    info!(
        complexity = analysis["complexity"].as_str().unwrap_or("unknown"),
        "Requirements analyzed"
    );
    state
        .results
        .push_ai_message("🔍 Analyse des exigences terminée");
    state.results.set("requirements_analysis", analysis);
    state.results.set("analysis_completed", true);
    Ok(())
}

/// Deterministic analysis from the task fields when the LLM is unusable.
fn basic_analysis(state: &WorkflowState) -> serde_json::Value {
    let files = state
        .task
        .files_to_modify
        .clone()
        .unwrap_or_default();
    json!({
        "complexity": state.task.estimated_complexity.as_deref().unwrap_or("medium"),
        "estimated_files": files,
        "plan": [format!("Implémenter: {}", state.task.title)],
        "risks": [],
        "degraded": true,
    })
}

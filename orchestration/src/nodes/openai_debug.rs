//! `openai_debug`: assisted debug after a human rejection or debug request.
//!
//! Bounded by its own counter, independent of the automatic debug loop.
//! When the human supplied modification instructions the node triggers a
//! reimplementation instead of patching in place.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use super::NodeContext;
use crate::clients::llm::{strip_json_fences, CompletionRequest};
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;
use crate::store::{CodeGenerationRecord, GenerationType};

pub async fn openai_debug(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let attempts = state.results.human_debug_attempts();
    let max_attempts = ctx.config.max_human_debug_attempts;
    if attempts >= max_attempts {
        warn!(attempts, max_attempts, "Post-validation debug limit reached");
        state.results.set("debug_limit_reached", true);
        state.results.push_ai_message(format!(
            "⚠️ Limite de debug assisté atteinte ({}/{})",
            attempts, max_attempts
        ));
        return Ok(());
    }
    let attempt = state.results.increment_human_debug_attempts();

    // Explicit instructions mean the human wants a different implementation,
    // not a patch
    if state.results.get_bool("should_retry_workflow") {
        if let Some(instructions) = state.results.get_str("modification_instructions") {
            if !instructions.is_empty() {
                info!("Human instructions present, triggering reimplementation");
                state.results.set("trigger_reimplementation", true);
                state.results.set("reimplement_with_modifications", true);
                return Ok(());
            }
        }
    }

    let failure_context = state
        .results
        .last_test_report()
        .map(|t| t.output.chars().take(4000).collect::<String>())
        .unwrap_or_else(|| "Aucun résultat de test disponible".to_string());
    let human_comments = state
        .results
        .get_str("modification_instructions")
        .unwrap_or("Le relecteur a demandé un debug")
        .to_string();

    let prompt = format!(
        "Un relecteur humain a demandé un debug.\n\nTâche: {}\nCommentaires: {}\n\
         Fichiers modifiés: {:?}\n\nDernier résultat de test:\n{}\n\n\
         Réponds en JSON uniquement: {{\"files\": {{\"chemin\": \"contenu corrigé\"}}, \
         \"diagnosis\": \"explication\"}}",
        state.task.title,
        human_comments,
        state.results.modified_files(),
        failure_context,
    );

    let completion = match ctx
        .llm
        .complete(&CompletionRequest::new(prompt).with_max_tokens(8000))
        .await
    {
        Ok(completion) => completion,
        Err(e) => {
            warn!(error = %e, "Assisted debug LLM failed");
            state.results.set("openai_debug_failed", true);
            state
                .results
                .push_error_log(format!("Debug assisté indisponible: {}", e));
            return Ok(());
        }
    };

    let files = serde_json::from_str::<Value>(strip_json_fences(&completion.content))
        .ok()
        .and_then(|v| v["files"].as_object().cloned())
        .unwrap_or_default();

    let workdir = state
        .working_directory()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let mut patched = Vec::new();
    for (path, content) in &files {
        let Some(full) = super::safe_workspace_path(&workdir, path) else {
            state
                .results
                .push_error_log(format!("Chemin de fichier rejeté: {}", path));
            continue;
        };
        let content = match content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if let Some(parent) = full.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if std::fs::write(&full, content).is_ok() {
            patched.push(path.clone());
        }
    }

    state.results.add_modified_files(patched.clone());
    state.results.set("openai_debug_completed", true);
    state.results.push_ai_message(format!(
        "🔧 Debug assisté #{}: {} fichier(s) corrigé(s)",
        attempt,
        patched.len()
    ));

    let _ = ctx.store.log_code_generation(CodeGenerationRecord {
        generation_id: 0,
        run_id: state.db_run_id.unwrap_or_default(),
        provider: completion.provider_used,
        model: completion.model,
        generation_type: GenerationType::Debug,
        files_modified: patched,
        tokens: completion.input_tokens + completion.output_tokens,
        latency_ms: completion.latency_ms,
        cost: None,
        created_at: Utc::now(),
    });

    info!(attempt, "Assisted debug finished");
    Ok(())
}

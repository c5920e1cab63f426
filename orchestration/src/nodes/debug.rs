//! `debug_code`: LLM-driven patching from the latest test failure.
//!
//! Loop accounting lives in the routing predicate; this node only produces
//! patches.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use super::NodeContext;
use crate::clients::llm::{strip_json_fences, CompletionRequest};
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;
use crate::store::{CodeGenerationRecord, GenerationType};

pub async fn debug_code(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let Some(last_report) = state.results.last_test_report() else {
        warn!("Debug node entered without a test report");
        state
            .results
            .push_error_log("Debug sans résultat de test".to_string());
        return Ok(());
    };

    let attempt = state.results.debug_attempts();
    let prompt = format!(
        "Les tests échouent. Corrige le code.\n\nTâche: {}\nFichiers modifiés: {:?}\n\n\
         Sortie des tests (échec):\n{}\n\n\
         Réponds en JSON uniquement: {{\"files\": {{\"chemin\": \"contenu corrigé\"}}, \
         \"diagnosis\": \"cause probable\"}}",
        state.task.title,
        state.results.modified_files(),
        last_report.output.chars().take(4000).collect::<String>(),
    );

    let completion = match ctx
        .llm
        .complete(&CompletionRequest::new(prompt).with_max_tokens(8000))
        .await
    {
        Ok(completion) => completion,
        Err(e) => {
            // A failed debug round is not fatal; the next test run decides
            warn!(error = %e, "Debug LLM failed");
            state
                .results
                .push_error_log(format!("Debug LLM indisponible: {}", e));
            return Ok(());
        }
    };

    let cleaned = strip_json_fences(&completion.content);
    let Some(files) = serde_json::from_str::<Value>(cleaned)
        .ok()
        .and_then(|v| v["files"].as_object().cloned())
    else {
        warn!("Debug reply unparseable");
        state
            .results
            .push_error_log("Réponse de debug non exploitable".to_string());
        return Ok(());
    };

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
    state
        .results
        .push_ai_message(format!("🔧 Debug #{}: {} fichier(s) corrigé(s)", attempt, patched.len()));

    let _ = ctx.store.log_code_generation(CodeGenerationRecord {
        generation_id: 0,
        run_id: state.db_run_id.unwrap_or_default(),
        provider: completion.provider_used,
        model: completion.model,
        generation_type: GenerationType::Debug,
        files_modified: patched.clone(),
        tokens: completion.input_tokens + completion.output_tokens,
        latency_ms: completion.latency_ms,
        cost: None,
        created_at: Utc::now(),
    });

    info!(attempt, patched = patched.len(), "Debug patch applied");
    Ok(())
}

//! `implement_task`: LLM-driven file edits.
//!
//! On rejection-with-retry rounds, the human's modification instructions
//! become the primary directive. Generated files are written into the
//! workspace; paths flow into `modified_files` (set semantics) and the code
//! map into `code_changes`.

use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::NodeContext;
use crate::clients::llm::{strip_json_fences, CompletionRequest};
use crate::error::{NodeError, NodeResult};
use crate::graph::state::WorkflowState;
use crate::store::{CodeGenerationRecord, GenerationType, LlmInteractionRecord};

pub async fn implement_task(ctx: &NodeContext, state: &mut WorkflowState) -> NodeResult<()> {
    let reimplementing = state.results.get_bool("reimplement_with_modifications");
    let generation_type = if reimplementing {
        GenerationType::Modification
    } else {
        GenerationType::Initial
    };

    let mut prompt = format!(
        "Tu es un développeur. Implémente la tâche suivante en modifiant ou créant des fichiers.\n\n\
         Titre: {}\nDescription: {}\nType: {}\nLangage projet: {}\n",
        state.task.title, state.task.description, state.task.task_type, state.project_language
    );
    if let Some(analysis) = state.results.get("requirements_analysis") {
        prompt.push_str(&format!("\nAnalyse préalable:\n{}\n", analysis));
    }
    if reimplementing {
        let instructions = state
            .results
            .get_str("modification_instructions")
            .unwrap_or("")
            .to_string();
        // Human instructions override everything else on a retry round
        prompt.push_str(&format!(
            "\nIMPORTANT - le relecteur humain a rejeté la version précédente.\n\
             Instructions de modification (PRIORITAIRES): {}\n",
            instructions
        ));
    }
    prompt.push_str(
        "\nRéponds en JSON uniquement: {\"files\": {\"chemin/fichier\": \"contenu complet\"}, \
         \"summary\": \"résumé des changements\"}",
    );

    let completion = ctx
        .llm
        .complete(&CompletionRequest::new(prompt.clone()).with_max_tokens(8000))
        .await
        .map_err(|e| {
            if e.is_transient() {
                NodeError::transient("implement_task", e.to_string())
            } else {
                NodeError::permanent("implement_task", e.to_string())
            }
        })?;

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

    let (files, summary) = parse_code_reply(&completion.content);
    if files.is_empty() {
        warn!("Implementation produced no files");
        state
            .results
            .push_error_log("Implémentation sans fichiers générés".to_string());
        state.results.set("implementation_success", false);
        return Ok(());
    }

    let workdir = state
        .working_directory()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let written = write_files(&workdir, &files, state);

    let paths: Vec<String> = files.keys().cloned().collect();
    state.results.add_modified_files(written.clone());
    state.results.set(
        "code_changes",
        Value::Object(files.clone().into_iter().collect()),
    );
    state.results.set("implementation_success", true);
    state.results.set("code_summary", summary.clone());
    state
        .results
        .push_ai_message(format!("💻 Implémentation: {} fichier(s) modifié(s)", paths.len()));

    // The retry directive is consumed by this round
    if reimplementing {
        state.results.set("reimplement_with_modifications", false);
        state.results.set("trigger_reimplementation", false);
    }

    let _ = ctx.store.log_code_generation(CodeGenerationRecord {
        generation_id: 0,
        run_id: state.db_run_id.unwrap_or_default(),
        provider: completion.provider_used,
        model: completion.model,
        generation_type,
        files_modified: written,
        tokens: completion.input_tokens + completion.output_tokens,
        latency_ms: completion.latency_ms,
        cost: None,
        created_at: Utc::now(),
    });

    info!(files = paths.len(), reimplementing, "Task implemented");
    Ok(())
}

/// Parse the model's `{"files": {...}, "summary": "..."}` reply, falling
/// back to a notes file when the reply is prose.
fn parse_code_reply(content: &str) -> (std::collections::BTreeMap<String, Value>, String) {
    let cleaned = strip_json_fences(content);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        if let Some(files) = value["files"].as_object() {
            let map = files
                .iter()
                .filter(|(path, _)| !path.is_empty())
                .map(|(path, content)| (path.clone(), content.clone()))
                .collect();
            let summary = value["summary"]
                .as_str()
                .unwrap_or("Changements générés")
                .to_string();
            return (map, summary);
        }
    }

    let mut map = std::collections::BTreeMap::new();
    map.insert("IMPLEMENTATION_NOTES.md".to_string(), json!(content));
    (map, "Réponse non structurée enregistrée".to_string())
}

/// Write generated files under the workspace; failures are recorded and the
/// remaining files still get written. Paths escaping the workspace are
/// rejected, not written.
fn write_files(
    workdir: &Path,
    files: &std::collections::BTreeMap<String, Value>,
    state: &mut WorkflowState,
) -> Vec<String> {
    let mut written = Vec::new();
    for (path, content) in files {
        let Some(full) = super::safe_workspace_path(workdir, path) else {
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
        match std::fs::write(&full, content) {
            Ok(()) => written.push(path.clone()),
            Err(e) => {
                state
                    .results
                    .push_error_log(format!("Écriture échouée {}: {}", path, e));
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_reply() {
        let reply = r#"```json
{"files": {"main.txt": "hello"}, "summary": "added main.txt"}
```"#;
        let (files, summary) = parse_code_reply(reply);
        assert_eq!(files.len(), 1);
        assert_eq!(files["main.txt"], json!("hello"));
        assert_eq!(summary, "added main.txt");
    }

    #[test]
    fn test_parse_prose_reply_becomes_notes() {
        let (files, _) = parse_code_reply("I would create a file called main.txt");
        assert!(files.contains_key("IMPLEMENTATION_NOTES.md"));
    }

    #[test]
    fn test_write_files_rejects_escaping_paths() {
        use crate::model::TaskRequest;

        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("workspace");
        std::fs::create_dir_all(&workdir).unwrap();

        let mut state = crate::graph::state::WorkflowState::new(
            TaskRequest::new("1", "t"),
            "wf",
            Some(1),
            Some(1),
            None,
        );
        let mut files = std::collections::BTreeMap::new();
        files.insert("../escape.txt".to_string(), json!("outside"));
        files.insert("/etc/target".to_string(), json!("outside"));
        files.insert("inside.txt".to_string(), json!("ok"));

        let written = write_files(&workdir, &files, &mut state);
        assert_eq!(written, vec!["inside.txt".to_string()]);
        assert!(workdir.join("inside.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
        assert_eq!(
            state
                .results
                .error_logs()
                .iter()
                .filter(|e| e.contains("Chemin de fichier rejeté"))
                .count(),
            2
        );
    }
}

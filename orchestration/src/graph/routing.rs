//! Conditional routing predicates.
//!
//! All decisions are deterministic — no LLM calls in this module. The
//! predicates read (and repair) the results channels, then return a typed
//! route for the graph to follow. Debug-attempt accounting lives here, which
//! makes the loop bounds auditable in one place.

use tracing::{info, warn};

use super::state::WorkflowState;
use crate::config::OrchestratorConfig;

/// Route out of `run_tests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRoute {
    /// Enter the debug loop.
    Debug,
    /// Proceed to quality assurance.
    Continue,
    /// Hard structural failure.
    End,
}

/// Route out of `monday_validation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRoute {
    Merge,
    Debug,
    /// Rejection-with-retry: back to implementation with instructions.
    Implement,
    UpdateOnly,
    End,
}

/// Route out of `openai_debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistedDebugRoute {
    Implement,
    Retest,
    UpdateOnly,
    End,
}

/// Decide whether to loop through debug after a test run.
pub fn route_after_tests(state: &mut WorkflowState, config: &OrchestratorConfig) -> TestRoute {
    if !state.results.contains("test_results") {
        warn!("Test results channel missing from state");
        state.results.set("current_status", "error_no_test_structure");
        state
            .results
            .set("error", "Structure de données de test manquante");
        state.results.set("should_continue", false);
        return TestRoute::End;
    }

    let reports = state.results.test_reports();
    let Some(last) = reports.last() else {
        info!("No tests executed, continuing to quality assurance");
        state.results.set("no_tests_found", true);
        state.results.set("test_status", "no_tests");
        state
            .results
            .push_ai_message("📝 Aucun test exécuté - Passage direct à l'assurance qualité");
        return TestRoute::Continue;
    };

    if last.no_tests_found || last.total_tests == 0 {
        info!("No tests found (0/0), continuing to quality assurance");
        state.results.set("no_tests_found", true);
        state.results.set("test_status", "no_tests");
        state
            .results
            .push_ai_message("📝 Aucun test trouvé - Passage direct à l'assurance qualité");
        return TestRoute::Continue;
    }

    if last.success {
        info!("Tests passed, continuing to quality assurance");
        return TestRoute::Continue;
    }

    let attempts = state.results.debug_attempts();
    let max_attempts = config.max_debug_attempts;
    if attempts >= max_attempts {
        warn!(
            attempts,
            max_attempts, "Debug limit reached, forcing continuation to QA"
        );
        let message = format!("Tests échoués après {} tentatives de debug", attempts);
        state.results.set("error", message.clone());
        state.results.push_error_log(message);
        return TestRoute::Continue;
    }

    let next = state.results.increment_debug_attempts();
    info!(
        attempt = next,
        max_attempts,
        failed = last.failed_tests,
        "Tests failed, entering debug loop"
    );
    TestRoute::Debug
}

/// Critical finalize-error markers: when one of these appears in the error
/// logs, the run cannot continue past validation routing.
const CRITICAL_FINALIZE_ERRORS: &[&str] = &[
    "URL du repository non définie",
    "Branche Git non définie",
    "Répertoire de travail non défini",
    "Working directory non défini",
];

/// Open issues an approval would override.
fn unresolved_issues(state: &WorkflowState) -> Vec<String> {
    let results = &state.results;
    let mut issues = Vec::new();

    if let Some(last) = results.last_test_report() {
        if !last.success && !last.no_tests_found && last.total_tests > 0 {
            issues.push("tests échoués".to_string());
            if last.failed_tests > 0 {
                issues.push(format!("{} test(s) en échec", last.failed_tests));
            }
        }
    }

    let error_logs = results.error_logs();
    if !error_logs.is_empty() {
        issues.push(format!("{} erreur(s) détectée(s)", error_logs.len()));
    }

    let has_pr = results.get_str("pr_url").is_some() || results.contains("pr_info");
    if !has_pr {
        issues.push("pull request non créée".to_string());
    }

    if let Some(qa) = results.get("quality_assurance") {
        let score = qa["overall_score"].as_u64().unwrap_or(95);
        if score < 30 {
            issues.push(format!("score qualité trop bas ({}/100)", score));
        }
    }

    issues
}

/// Decide the path after the human validation gate.
pub fn route_after_validation(state: &mut WorkflowState) -> ValidationRoute {
    if state.results.get_str("current_status") == Some("failed_validation") {
        warn!("Critical validation failure, ending workflow");
        return ValidationRoute::End;
    }

    for log in state.results.error_logs() {
        if CRITICAL_FINALIZE_ERRORS.iter().any(|e| log.contains(e)) {
            warn!(error = %log, "Critical finalize error, ending workflow");
            return ValidationRoute::End;
        }
    }

    if state.results.get_bool("skip_github") {
        warn!("GitHub push skipped, updating Monday only");
        return ValidationRoute::UpdateOnly;
    }

    let mut decision = state
        .results
        .get_str("human_decision")
        .unwrap_or("error")
        .to_string();
    let mut should_merge = state.results.get_bool("should_merge");
    let validation_status = state
        .results
        .get_str("human_validation_status")
        .map(|s| s.to_lowercase());

    // Consistency repair between the decision flags before routing
    if decision == "approved" && !should_merge {
        warn!("Inconsistency: approved without should_merge, repairing");
        state.results.set("should_merge", true);
        should_merge = true;
    } else if matches!(decision.as_str(), "rejected" | "debug") && should_merge {
        warn!(decision = %decision, "Inconsistency: rejection with should_merge, repairing");
        state.results.set("should_merge", false);
        should_merge = false;
    } else if validation_status.as_deref() == Some("approved")
        && !matches!(decision.as_str(), "approved" | "approve_auto")
    {
        info!(previous = %decision, "Normalizing decision from validation status: approved");
        state.results.set("human_decision", "approved");
        state.results.set("should_merge", true);
        decision = "approved".to_string();
        should_merge = true;
    } else if matches!(validation_status.as_deref(), Some("rejected") | Some("debug"))
        && !matches!(
            decision.as_str(),
            "rejected" | "rejected_with_retry" | "debug" | "error" | "timeout"
        )
    {
        info!(previous = %decision, "Normalizing decision from validation status: rejected");
        state.results.set("human_decision", "rejected");
        state.results.set("should_merge", false);
        decision = "rejected".to_string();
        should_merge = false;
    }

    if state
        .results
        .get_str("error")
        .is_some_and(|e| e.to_lowercase().contains("timeout"))
    {
        warn!("Validation timeout recorded, updating Monday only");
        return ValidationRoute::UpdateOnly;
    }

    match decision.as_str() {
        "error" | "timeout" => {
            warn!(decision = %decision, "Validation did not resolve, updating Monday only");
            ValidationRoute::UpdateOnly
        }
        "approve_auto" | "approved" => {
            if decision == "approve_auto" {
                info!("Auto-approval treated as approved");
                state.results.set("human_decision", "approved");
                state.results.set("should_merge", true);
            } else if !should_merge {
                return ValidationRoute::UpdateOnly;
            }

            let issues = unresolved_issues(state);
            if !issues.is_empty() {
                // Human authority wins over open issues; record the override
                warn!(?issues, "Approval despite open issues, merging anyway");
                state
                    .results
                    .push_ai_message(format!("⚠️ Merge approuvé malgré: {}", issues.join(", ")));
                state.results.set("human_override", true);
                state.results.set(
                    "override_issues",
                    serde_json::Value::Array(
                        issues.into_iter().map(serde_json::Value::String).collect(),
                    ),
                );
            }
            ValidationRoute::Merge
        }
        "rejected_with_retry" => {
            let rejection_count = state.results.get_u32("rejection_count").max(1);
            if rejection_count >= 3 {
                warn!(rejection_count, "Rejection limit reached, ending workflow");
                return ValidationRoute::End;
            }
            let instructions = state
                .results
                .get_str("modification_instructions")
                .unwrap_or("")
                .to_string();
            info!(
                rejection_count,
                instructions = %instructions.chars().take(100).collect::<String>(),
                "Rejection with retry, relaunching implementation"
            );
            state.results.set("reimplement_with_modifications", true);
            state
                .results
                .set("modification_reason", "human_rejection_with_instructions");
            ValidationRoute::Implement
        }
        "rejected" => {
            info!("Code rejected without retry instructions, updating Monday only");
            ValidationRoute::UpdateOnly
        }
        "debug" => {
            info!("Human requested debug, launching assisted debug");
            ValidationRoute::Debug
        }
        "abandoned" => {
            warn!("Workflow abandoned by human, stopping");
            ValidationRoute::End
        }
        other => {
            warn!(
                decision = other,
                should_merge, "Unhandled validation decision, updating Monday only"
            );
            ValidationRoute::UpdateOnly
        }
    }
}

/// Decide the path after the assisted debug pass.
pub fn route_after_assisted_debug(state: &mut WorkflowState) -> AssistedDebugRoute {
    if state.results.get_bool("trigger_reimplementation") {
        info!("Reimplementation triggered with human instructions");
        return AssistedDebugRoute::Implement;
    }
    if state.results.get_bool("debug_limit_reached") {
        warn!("Post-validation debug limit reached, updating Monday only");
        return AssistedDebugRoute::UpdateOnly;
    }
    if state.results.get_bool("openai_debug_failed") {
        warn!("Assisted debug failed, updating Monday only");
        return AssistedDebugRoute::UpdateOnly;
    }
    if state.results.contains("should_continue") && !state.results.get_bool("should_continue") {
        warn!("Workflow flagged to stop, updating Monday only");
        return AssistedDebugRoute::UpdateOnly;
    }
    info!("Assisted debug finished, rerunning tests");
    AssistedDebugRoute::Retest
}

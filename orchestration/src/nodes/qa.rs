//! `quality_assurance_automation`: deterministic static checks.
//!
//! No LLM involvement. The score aggregates what the run itself already
//! knows: test outcome, error volume, environment degradation, change size.

use serde_json::json;
use tracing::info;

use super::NodeContext;
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;

pub async fn quality_assurance_automation(
    _ctx: &NodeContext,
    state: &mut WorkflowState,
) -> NodeResult<()> {
    let mut score: i64 = 100;
    let mut checks = Vec::new();

    let modified = state.results.modified_files();
    if modified.is_empty() {
        score -= 40;
        checks.push(json!({"check": "changes_present", "passed": false}));
    } else {
        checks.push(json!({"check": "changes_present", "passed": true, "files": modified.len()}));
    }

    match state.results.last_test_report() {
        Some(report) if report.total_tests > 0 => {
            if report.success {
                checks.push(json!({"check": "tests", "passed": true}));
            } else {
                score -= 30;
                checks.push(json!({"check": "tests", "passed": false, "failed": report.failed_tests}));
            }
        }
        _ => {
            score -= 20;
            checks.push(json!({"check": "tests", "passed": false, "reason": "no tests"}));
        }
    }

    let error_count = state.results.error_logs().len() as i64;
    if error_count > 0 {
        score -= (error_count * 10).min(30);
        checks.push(json!({"check": "errors", "passed": false, "count": error_count}));
    } else {
        checks.push(json!({"check": "errors", "passed": true}));
    }

    if state.results.get_bool("fallback_mode") {
        score -= 10;
        checks.push(json!({"check": "environment", "passed": false, "reason": "fallback mode"}));
    }

    let overall_score = score.clamp(0, 100);
    info!(overall_score, "Static QA finished");

    state.results.set(
        "quality_assurance",
        json!({"overall_score": overall_score, "checks": checks}),
    );
    state
        .results
        .push_ai_message(format!("📊 Score qualité: {}/100", overall_score));
    Ok(())
}

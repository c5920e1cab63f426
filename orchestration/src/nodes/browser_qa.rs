//! `browser_quality_assurance`: optional in-browser sweep.
//!
//! Runs only when a deployed application URL is configured; otherwise the
//! node records a skip and the pipeline continues.

use tracing::{info, warn};

use super::NodeContext;
use crate::error::NodeResult;
use crate::graph::state::WorkflowState;

pub async fn browser_quality_assurance(
    ctx: &NodeContext,
    state: &mut WorkflowState,
) -> NodeResult<()> {
    let Some(base_url) = &ctx.browser_base_url else {
        info!("No browser QA base URL configured, skipping");
        state
            .results
            .set("browser_qa", serde_json::json!({"executed": false}));
        return Ok(());
    };

    match ctx.browser_qa.run(base_url).await {
        Ok(report) => {
            info!(
                executed = report.executed,
                passed = report.tests_passed,
                failed = report.tests_failed,
                "Browser QA finished"
            );
            if report.executed {
                state.results.push_ai_message(format!(
                    "🌐 Browser QA: {}/{} tests réussis",
                    report.tests_passed, report.tests_executed
                ));
            }
            state.results.set(
                "browser_qa",
                serde_json::to_value(&report).unwrap_or_default(),
            );
        }
        Err(e) => {
            // Browser QA is advisory; record and continue
            warn!(error = %e, "Browser QA failed");
            state
                .results
                .push_error_log(format!("Browser QA échoué: {}", e));
            state.results.set(
                "browser_qa",
                serde_json::json!({"executed": false, "error": e.to_string()}),
            );
        }
    }
    Ok(())
}

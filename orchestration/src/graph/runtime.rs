//! Node runtime: persistence wrapping around every node execution.
//!
//! On entry a step row is created (order = completed nodes + 1) and its id
//! written into state so LLM interaction logs attach correctly. Transient
//! failures restore the pre-node snapshot and retry up to the configured
//! bound; permanent failures complete the step as failed and propagate.
//! Successful exits save a checkpoint with a compact summary of the delta.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::graph::NodeName;
use super::state::WorkflowState;
use crate::error::{NodeError, NodeResult};
use crate::events::{EventBus, WorkflowEvent};
use crate::model::WorkflowStatus;
use crate::nodes::{execute_node, NodeContext};

/// Delay between node retry attempts.
const NODE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Wraps node execution with step records, retry and checkpoints.
pub struct NodeRuntime<'a> {
    ctx: &'a NodeContext,
    bus: &'a EventBus,
}

impl<'a> NodeRuntime<'a> {
    pub fn new(ctx: &'a NodeContext, bus: &'a EventBus) -> Self {
        Self { ctx, bus }
    }

    /// Compact output summary for the step row — never the generated code,
    /// which lives in the code-generation rows.
    fn output_summary(state: &WorkflowState) -> serde_json::Value {
        json!({
            "has_results": !state.results.as_map().is_empty(),
            "has_error": state.results.get_str("error").is_some(),
            "current_status": state.results.get_str("current_status").unwrap_or("unknown"),
            "modified_files": state.results.modified_files().len(),
            "ai_messages": state.results.ai_messages().len(),
            "error_logs": state.results.error_logs().len(),
        })
    }

    pub async fn execute(&self, node: NodeName, state: &mut WorkflowState) -> NodeResult<()> {
        let node_name = node.as_str();
        let order = state.completed_nodes.len() as u32 + 1;
        state.current_node = Some(node_name.to_string());

        let step_id = match state.db_run_id {
            Some(run_id) => {
                let input = json!({
                    "node": node_name,
                    "order": order,
                    "is_reactivation": state.is_reactivation,
                });
                match self
                    .ctx
                    .store
                    .create_step(run_id, node_name, order, Some(input))
                {
                    Ok(step_id) => Some(step_id),
                    Err(e) => {
                        warn!(node = node_name, error = %e, "Step row creation failed");
                        None
                    }
                }
            }
            None => None,
        };
        state.current_step_id = step_id;

        let snapshot = state.clone();
        let max_retries = self.ctx.config.max_retry_attempts;
        let mut attempt = 0u32;

        loop {
            match execute_node(node, self.ctx, state).await {
                Ok(()) => {
                    state.mark_node_completed(node_name);
                    if let Some(step_id) = step_id {
                        let _ = self.ctx.store.complete_step(
                            step_id,
                            WorkflowStatus::Completed,
                            Some(Self::output_summary(state)),
                            None,
                        );
                    }
                    self.save_checkpoint(node_name, state);
                    self.bus.publish(WorkflowEvent::Step {
                        run_id: state.db_run_id.unwrap_or_default(),
                        node: node_name.to_string(),
                        status: "completed".to_string(),
                        retry_count: attempt,
                        timestamp: Utc::now(),
                    });
                    info!(node = node_name, order, "Node completed");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        node = node_name,
                        attempt,
                        max_retries,
                        error = %e,
                        "Transient node failure, restoring snapshot and retrying"
                    );
                    // Restore the pre-node state; retry accounting survives
                    let retries = state.node_retry_count.clone();
                    *state = snapshot.clone();
                    state.node_retry_count = retries;
                    state.bump_retry_count(node_name);
                    state.current_step_id = step_id;
                    if let Some(step_id) = step_id {
                        let _ = self.ctx.store.bump_step_retry(step_id);
                    }
                    tokio::time::sleep(NODE_RETRY_DELAY).await;
                }
                Err(e) => {
                    if let Some(step_id) = step_id {
                        let _ = self.ctx.store.complete_step(
                            step_id,
                            WorkflowStatus::Failed,
                            Some(Self::output_summary(state)),
                            Some(&e.to_string()),
                        );
                    }
                    self.bus.publish(WorkflowEvent::Step {
                        run_id: state.db_run_id.unwrap_or_default(),
                        node: node_name.to_string(),
                        status: "failed".to_string(),
                        retry_count: attempt,
                        timestamp: Utc::now(),
                    });
                    return Err(NodeError::permanent(node_name, e.to_string()));
                }
            }
        }
    }

    fn save_checkpoint(&self, node_name: &str, state: &WorkflowState) {
        let Some(run_id) = state.db_run_id else {
            return;
        };
        // Results snapshot minus the code map (which lives in the
        // code-generation rows); this is what a resume merges back
        let mut results = state.results.as_map().clone();
        results.remove("code_changes");
        let payload = json!({
            "node_name": node_name,
            "completed_at": Utc::now(),
            "completed_nodes": state.completed_nodes,
            "output_summary": Self::output_summary(state),
            "results": results,
        });
        match self.ctx.store.save_checkpoint(run_id, node_name, payload) {
            Ok(()) => {
                self.bus.publish(WorkflowEvent::CheckpointSaved {
                    run_id,
                    node: node_name.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => warn!(node = node_name, error = %e, "Checkpoint save failed"),
        }
    }
}

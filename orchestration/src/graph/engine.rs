//! Workflow engine: drives a run through the graph.
//!
//! Two-level timeouts (global run clock, per-node clock), a node-dispatch
//! safety limit, an observable event stream, and recovery that skips nodes
//! already completed in a restored state. A fired per-node timeout routes to
//! graceful shutdown, never to the retry path.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use super::graph::{NodeName, Transition, WorkflowGraph};
use super::runtime::NodeRuntime;
use super::state::WorkflowState;
use crate::events::{SharedEventBus, WorkflowEvent};
use crate::model::WorkflowStatus;
use crate::nodes::NodeContext;

/// Final outcome of one engine execution.
#[derive(Debug)]
pub struct RunReport {
    pub success: bool,
    pub status: WorkflowStatus,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub final_state: WorkflowState,
}

/// Drives the graph for one run at a time; many engines run in parallel
/// across workers.
pub struct WorkflowEngine {
    ctx: Arc<NodeContext>,
    graph: WorkflowGraph,
    bus: SharedEventBus,
}

impl WorkflowEngine {
    pub fn new(ctx: Arc<NodeContext>, bus: SharedEventBus) -> Self {
        Self {
            ctx,
            graph: WorkflowGraph::new(),
            bus,
        }
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Execute a run to a terminal state under the global timeout.
    pub async fn execute(&self, mut state: WorkflowState) -> RunReport {
        let started = std::time::Instant::now();
        let global_timeout = self.ctx.config.global_timeout();

        let outcome = tokio::time::timeout(global_timeout, self.drive(&mut state)).await;

        let (status, error) = match outcome {
            Ok(Ok(())) => {
                let success = state.results.get_bool("success")
                    || state.results.get_str("current_status") == Some("completed");
                if success {
                    (WorkflowStatus::Completed, None)
                } else {
                    (
                        WorkflowStatus::Failed,
                        state.results.get_str("error").map(String::from),
                    )
                }
            }
            Ok(Err(message)) => (WorkflowStatus::Failed, Some(message)),
            Err(_) => {
                error!(
                    workflow_id = %state.workflow_id,
                    timeout_secs = global_timeout.as_secs(),
                    "Global workflow timeout"
                );
                self.bus.publish(WorkflowEvent::RunTimedOut {
                    run_id: state.db_run_id.unwrap_or_default(),
                    timeout_secs: global_timeout.as_secs(),
                    timestamp: Utc::now(),
                });
                // The node future was dropped mid-flight; close its step row
                self.fail_open_step(&state, "global timeout");
                self.release_queue_on_abort(&state, "global timeout");
                (WorkflowStatus::Timeout, Some("global timeout".to_string()))
            }
        };

        state.status = status;
        state.completed_at = Some(Utc::now());
        let duration_seconds = started.elapsed().as_secs_f64();
        let success = status == WorkflowStatus::Completed;

        self.finalize_run(&state, status, error.as_deref(), duration_seconds);
        self.bus.publish(WorkflowEvent::RunCompleted {
            run_id: state.db_run_id.unwrap_or_default(),
            status: status.to_string(),
            error: error.clone(),
            timestamp: Utc::now(),
        });

        RunReport {
            success,
            status,
            error,
            duration_seconds,
            final_state: state,
        }
    }

    async fn drive(&self, state: &mut WorkflowState) -> Result<(), String> {
        state.status = WorkflowStatus::Running;
        self.bus.publish(WorkflowEvent::RunStarted {
            run_id: state.db_run_id.unwrap_or_default(),
            workflow_id: state.workflow_id.clone(),
            is_reactivation: state.is_reactivation,
            timestamp: Utc::now(),
        });

        let recovering = state.recovery_mode
            || !state.checkpoint_data.is_empty()
            || !state.completed_nodes.is_empty();
        let mut node = if recovering {
            let resume = self.graph.resume_point(state);
            info!(
                workflow_id = %state.workflow_id,
                resume_node = resume.as_str(),
                completed = state.completed_nodes.len(),
                "Recovery mode: resuming at first incomplete node"
            );
            resume
        } else {
            self.graph.entry_point()
        };

        let runtime = NodeRuntime::new(&self.ctx, &self.bus);
        let node_timeout = self.ctx.config.node_timeout();
        let max_nodes = self.ctx.config.max_nodes_safety_limit;
        let mut dispatches = 0u32;

        loop {
            dispatches += 1;
            if dispatches > max_nodes {
                error!(dispatches, max_nodes, "Node safety limit reached");
                self.bus.publish(WorkflowEvent::SafetyLimitReached {
                    run_id: state.db_run_id.unwrap_or_default(),
                    nodes_executed: dispatches,
                    limit: max_nodes,
                    timestamp: Utc::now(),
                });
                state
                    .results
                    .push_error_log(format!("Arrêt forcé - limite de {} nœuds atteinte", max_nodes));
                return Err(format!("safety limit of {} nodes reached", max_nodes));
            }

            // The validation gate waits on a human with its own final
            // timeout; give it headroom instead of the generic node clock
            let effective_timeout = if node == NodeName::MondayValidation {
                self.ctx.config.validation_timeout(true) + std::time::Duration::from_secs(60)
            } else {
                node_timeout
            };

            match tokio::time::timeout(effective_timeout, runtime.execute(node, state)).await {
                Err(_) => {
                    // Timeout routes to graceful shutdown, not retry
                    warn!(
                        node = node.as_str(),
                        timeout_secs = effective_timeout.as_secs(),
                        "Node timeout"
                    );
                    self.bus.publish(WorkflowEvent::NodeTimeout {
                        run_id: state.db_run_id.unwrap_or_default(),
                        node: node.as_str().to_string(),
                        timeout_secs: effective_timeout.as_secs(),
                        timestamp: Utc::now(),
                    });
                    self.fail_open_step(state, "node timeout");
                    state.results.push_error_log(format!(
                        "Timeout du nœud {} après {}s",
                        node,
                        effective_timeout.as_secs()
                    ));
                    return Err(format!(
                        "node {} timed out after {}s",
                        node,
                        effective_timeout.as_secs()
                    ));
                }
                Ok(Err(e)) => {
                    state.results.push_error_log(e.to_string());
                    return Err(e.to_string());
                }
                Ok(Ok(())) => {}
            }

            match self.graph.next(node, state, &self.ctx.config) {
                Transition::To(next) => node = next,
                Transition::End => break,
            }
        }
        Ok(())
    }

    /// Close the step row left running when a node future was dropped.
    fn fail_open_step(&self, state: &WorkflowState, reason: &str) {
        if let Some(step_id) = state.current_step_id {
            let _ = self.ctx.store.complete_step(
                step_id,
                WorkflowStatus::Failed,
                None,
                Some(reason),
            );
        }
    }

    /// On aborts that never reach `update_monday`, the slot must still be
    /// released.
    fn release_queue_on_abort(&self, state: &WorkflowState, reason: &str) {
        if let (Some(queue_id), Some(external_id)) = (&state.queue_id, state.task.monday_item_id) {
            if let Err(e) = self.ctx.queue.mark_failed(external_id, queue_id, reason) {
                warn!(error = %e, "Queue release on abort failed");
            }
        }
    }

    fn finalize_run(
        &self,
        state: &WorkflowState,
        status: WorkflowStatus,
        error: Option<&str>,
        duration_seconds: f64,
    ) {
        let Some(run_id) = state.db_run_id else {
            return;
        };
        let metrics = json!({
            "success": status == WorkflowStatus::Completed,
            "duration_seconds": duration_seconds,
            "completed_nodes": state.completed_nodes,
            "final_status": state.results.get_str("current_status").unwrap_or("unknown"),
            "monday_final_status": state.results.get_str("monday_final_status"),
            "debug_attempts": state.results.debug_attempts(),
            "human_debug_attempts": state.results.human_debug_attempts(),
            "browser_qa": state.results.get("browser_qa"),
        });
        if let Err(e) = self
            .ctx
            .store
            .complete_task_run(run_id, status, Some(metrics), error)
        {
            warn!(run_id, error = %e, "Run finalization write failed");
        }
    }
}

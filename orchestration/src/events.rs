//! Workflow events: the engine's observable stream.
//!
//! Every node execution yields a step event; terminal conditions (timeout,
//! safety limit, completion) yield their own variants. Events fan out over
//! a broadcast channel and are optionally persisted to the application
//! event log for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::SharedStore;

/// Channel capacity for the broadcast stream.
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to the event bus.
pub type SharedEventBus = Arc<EventBus>;

/// Events emitted while driving a run through the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: i64,
        workflow_id: String,
        is_reactivation: bool,
        timestamp: DateTime<Utc>,
    },

    /// A node finished executing (successfully or not).
    Step {
        run_id: i64,
        node: String,
        status: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    CheckpointSaved {
        run_id: i64,
        node: String,
        timestamp: DateTime<Utc>,
    },

    ValidationRequested {
        run_id: i64,
        validation_id: String,
        timestamp: DateTime<Utc>,
    },

    ValidationResolved {
        run_id: i64,
        validation_id: String,
        decision: String,
        timestamp: DateTime<Utc>,
    },

    NodeTimeout {
        run_id: i64,
        node: String,
        timeout_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// The global run timeout fired; the run was recorded as timed out.
    RunTimedOut {
        run_id: i64,
        timeout_secs: u64,
        timestamp: DateTime<Utc>,
    },

    SafetyLimitReached {
        run_id: i64,
        nodes_executed: u32,
        limit: u32,
        timestamp: DateTime<Utc>,
    },

    RunCompleted {
        run_id: i64,
        status: String,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::Step { timestamp, .. }
            | Self::CheckpointSaved { timestamp, .. }
            | Self::ValidationRequested { timestamp, .. }
            | Self::ValidationResolved { timestamp, .. }
            | Self::NodeTimeout { timestamp, .. }
            | Self::RunTimedOut { timestamp, .. }
            | Self::SafetyLimitReached { timestamp, .. }
            | Self::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn run_id(&self) -> i64 {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::Step { run_id, .. }
            | Self::CheckpointSaved { run_id, .. }
            | Self::ValidationRequested { run_id, .. }
            | Self::ValidationResolved { run_id, .. }
            | Self::NodeTimeout { run_id, .. }
            | Self::RunTimedOut { run_id, .. }
            | Self::SafetyLimitReached { run_id, .. }
            | Self::RunCompleted { run_id, .. } => *run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::Step { .. } => "step",
            Self::CheckpointSaved { .. } => "checkpoint_saved",
            Self::ValidationRequested { .. } => "validation_requested",
            Self::ValidationResolved { .. } => "validation_resolved",
            Self::NodeTimeout { .. } => "node_timeout",
            Self::RunTimedOut { .. } => "run_timed_out",
            Self::SafetyLimitReached { .. } => "safety_limit_reached",
            Self::RunCompleted { .. } => "run_completed",
        }
    }
}

/// Broadcast bus with optional persistence.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
    store: Option<SharedStore>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store: None,
        }
    }

    pub fn with_persistence(store: SharedStore) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store: Some(store),
        }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event; absence of subscribers is not an error.
    pub fn publish(&self, event: WorkflowEvent) {
        if let Some(store) = &self.store {
            let payload = serde_json::to_value(&event).unwrap_or_default();
            if let Err(e) = store.log_application_event(
                None,
                "info",
                "engine",
                event.event_type(),
                &format!("run {}", event.run_id()),
                Some(payload),
            ) {
                warn!(error = %e, event_type = event.event_type(), "Event persistence failed");
            }
        }

        match self.sender.send(event) {
            Ok(count) => debug!(receivers = count, "Event published"),
            Err(_) => debug!("Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

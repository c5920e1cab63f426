//! Workflow orchestration engine for an autonomous development agent.
//!
//! This crate coordinates the full lifecycle of a work item coming from an
//! external project-management surface:
//!
//! - **Persistence** (`store`): tasks, runs, steps, LLM calls, test
//!   results, pull requests, validations, triggers — every step is
//!   persisted for audit and recovery.
//! - **Admission** (`queue`): per-item FIFO, at most one active run per
//!   external item, byte-equal duplicate rejection.
//! - **Conversation** (`mention`, `intent`): `@vydata` mention parsing,
//!   LLM-backed intent classification with a deterministic fallback, and
//!   routing between direct answers and workflow reactivation.
//! - **Execution** (`graph`, `nodes`): a twelve-node state graph with
//!   bounded debug loops, per-node and global timeouts, checkpointing and
//!   crash recovery.
//! - **Human gate** (`validation`): durable validation requests, Monday
//!   reply interpretation, a two-tier Slack notification wait and an
//!   auto-approve timeout policy.
//! - **Collaborators** (`clients`): trait seams for the LLM (with provider
//!   fallback), git, GitHub, Monday, Slack, vector retrieval and browser
//!   QA.

pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod intent;
pub mod mention;
pub mod model;
pub mod nodes;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod validation;

// Re-export the surface the binary and integration tests compose against
pub use config::{config, init_config, OrchestratorConfig};
pub use error::{NodeError, NodeResult, StoreError, StoreResult};
pub use events::{EventBus, SharedEventBus, WorkflowEvent};
pub use graph::{
    NodeName, Results, RunReport, WorkflowEngine, WorkflowGraph, WorkflowState,
};
pub use intent::{IntentClassifier, IntentType, TaskContext, UpdateIntent, UpdateRouter};
pub use mention::{MentionParseResult, MentionParser};
pub use model::{
    TaskPriority, TaskRequest, TaskStatus, TaskType, TestReport, WorkItemEnvelope, WorkflowStatus,
};
pub use nodes::NodeContext;
pub use orchestrator::{CommentOutcome, Orchestrator, WorkerPool};
pub use queue::{Admission, QueueManager};
pub use store::{PersistenceStore, RunParams, SharedStore};
pub use validation::{
    NotificationCoordinator, ReplyDecision, ValidationRequest, ValidationResponse,
    ValidationStatus, ValidationStore, ValidationWaitParams,
};

//! Intent classification and routing of inbound Monday comments.

pub mod classifier;
pub mod router;
pub mod trigger;

pub use classifier::{
    classify_by_keywords, ExtractedRequirements, IntentClassifier, IntentType, TaskContext,
    UpdateIntent,
};
pub use router::{RouteOutcome, UpdateRouter, WorkSubmitter};
pub use trigger::{PreparedReactivation, WorkflowTrigger};

//! Workflow graph: state container, routing predicates, node/edge
//! declarations, the persistence-wrapping node runtime and the engine.

pub mod engine;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod routing;
pub mod runtime;
pub mod state;

pub use engine::{RunReport, WorkflowEngine};
pub use graph::{NodeName, Transition, WorkflowGraph};
pub use routing::{
    route_after_assisted_debug, route_after_tests, route_after_validation, AssistedDebugRoute,
    TestRoute, ValidationRoute,
};
pub use runtime::NodeRuntime;
pub use state::{Results, WorkflowState};

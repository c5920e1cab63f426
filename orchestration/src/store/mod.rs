//! Persistence store: typed CRUD over tasks, runs, steps, LLM calls,
//! tests, pull requests, triggers, events and configuration.

pub mod schema;
pub mod store;
pub mod types;

pub use store::{PersistenceStore, RunParams, SharedStore};
pub use types::*;

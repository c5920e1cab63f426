//! Vector-store collaborator for conversational context retrieval.
//!
//! Strictly best-effort: failures are logged and never block a decision.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CollaboratorResult;

/// A retrieval hit with similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub text: String,
    pub score: f64,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn store_message(
        &self,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> CollaboratorResult<String>;

    async fn query(&self, text: &str, limit: usize) -> CollaboratorResult<Vec<VectorHit>>;
}

/// Default store when no retrieval backend is configured.
#[derive(Debug, Default)]
pub struct NoopVectorStore;

#[async_trait]
impl VectorStore for NoopVectorStore {
    async fn store_message(
        &self,
        _text: &str,
        _metadata: HashMap<String, String>,
    ) -> CollaboratorResult<String> {
        Ok(String::new())
    }

    async fn query(&self, _text: &str, _limit: usize) -> CollaboratorResult<Vec<VectorHit>> {
        Ok(Vec::new())
    }
}

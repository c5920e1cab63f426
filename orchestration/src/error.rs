//! Error taxonomy for the orchestration engine.
//!
//! Two layers: `StoreError` for the persistence boundary and `NodeError`
//! for node execution. The distinction that matters everywhere is
//! transient-vs-permanent: transient failures are retried with backoff,
//! permanent failures abort the operation and propagate.

use thiserror::Error;

/// Result type alias for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised at the persistence boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store was used before `open` or after `close`.
    #[error("Persistence store not available: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated (duplicate external id).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A required foreign key was null. `create_pull_request` raises this
    /// when task or run ids are missing.
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// Transient I/O failure (lock contention, operation in progress).
    /// Retried with exponential backoff inside the store.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn missing_reference(msg: impl Into<String>) -> Self {
        Self::MissingReference(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::LockPoisoned)
    }
}

/// Result type alias for node execution.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised while executing a workflow node.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Timeouts, connection failures, collaborator 5xx. The node runtime
    /// restores the pre-node snapshot and retries up to the configured bound.
    #[error("Transient failure in {node}: {message}")]
    Transient { node: String, message: String },

    /// Schema/permission failures, collaborator 4xx, invariant violations.
    /// Never retried.
    #[error("Permanent failure in {node}: {message}")]
    Permanent { node: String, message: String },
}

impl NodeError {
    pub fn transient(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn permanent(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn node(&self) -> &str {
        match self {
            Self::Transient { node, .. } | Self::Permanent { node, .. } => node,
        }
    }
}

impl From<StoreError> for NodeError {
    fn from(err: StoreError) -> Self {
        let node = "persistence".to_string();
        if err.is_transient() {
            NodeError::Transient {
                node,
                message: err.to_string(),
            }
        } else {
            NodeError::Permanent {
                node,
                message: err.to_string(),
            }
        }
    }
}

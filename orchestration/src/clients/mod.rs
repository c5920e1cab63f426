//! External collaborator clients.
//!
//! The engine only depends on the traits in these modules; concrete HTTP
//! implementations live alongside them and tests substitute scripted mocks.

pub mod browser;
pub mod git;
pub mod github;
pub mod llm;
pub mod monday;
pub mod slack;
pub mod vector;

use thiserror::Error;

/// Failure surfaced by an outbound collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// 5xx and transport failures may succeed on retry; 4xx will not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CollaboratorError::api(503, "down").is_transient());
        assert!(CollaboratorError::unavailable("net").is_transient());
        assert!(!CollaboratorError::api(422, "bad field").is_transient());
        assert!(!CollaboratorError::invalid("not json").is_transient());
    }
}

//! Error taxonomy for remote store operations.
//!
//! Every failure coming out of a [`RemoteStore`](crate::store::RemoteStore)
//! is classified here, so the retry policy never has to inspect
//! transport-specific error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The remote rejected a write because its version moved on.
    #[error("version conflict on {document_id}: wrote against {expected}, remote is at {}", describe_version(.found))]
    Conflict {
        document_id: String,
        expected: u64,
        found: Option<u64>,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    /// A non-success HTTP status other than 404/409.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection refused/reset, DNS failure, broken pipe.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The remote answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built (bad base URL, unusable id).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn describe_version(found: &Option<u64>) -> String {
    match found {
        Some(v) => v.to_string(),
        None => "an unknown version".to_string(),
    }
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network errors, timeouts, 5xx, 408 and 429 are transient. Conflicts
    /// are never transient: they need a decision from the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Network(_) | StoreError::Timeout(_) => true,
            StoreError::Http { status, .. } => {
                (500..600).contains(status) || *status == 408 || *status == 429
            }
            StoreError::Conflict { .. }
            | StoreError::NotFound(_)
            | StoreError::InvalidResponse(_)
            | StoreError::InvalidRequest(_) => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

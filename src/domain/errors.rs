//! Domain errors for the hivemind orchestrator.

use thiserror::Error;

/// Errors surfaced by the orchestrator core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad inputs: malformed request, unknown model, invalid graph edge.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The router exhausted every candidate after filters and fallback.
    #[error("No candidate model satisfies the request")]
    NoCandidate,

    /// Provider network/HTTP/SDK error, attributed to the model that failed.
    #[error("Upstream error from {provider}/{model}: {message}")]
    Upstream {
        provider: String,
        model: String,
        message: String,
    },

    /// The rate limiter denied the call.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A per-task, per-workflow, or fan-out deadline fired.
    #[error("Timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// A cancellation flag was set or a caller cancelled by id.
    #[error("Cancelled")]
    Cancelled,

    /// The task graph has pending tasks that can never become ready.
    #[error("Workflow deadlock: {0}")]
    Deadlock(String),

    /// The consent gate rejected the access.
    #[error("Consent denied: {0}")]
    ConsentDenied(String),

    /// The model registry is missing required models at startup.
    #[error("Registry integrity violation: {0}")]
    Integrity(String),

    /// Illegal task/workflow state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// An entity lookup came back empty.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The session exists but is inactive or past its expiry.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Client and server protocol versions disagree.
    #[error("Unsupported protocol version: {got} (expected {expected})")]
    ProtocolMismatch { got: String, expected: String },

    /// A storage port failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Transient errors may succeed on retry; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::RateLimited(_) | Self::Store(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

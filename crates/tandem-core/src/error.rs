//! Error types shared across the core
//!
//! Only `ProviderError` (and cancellation) ends a turn. Tool, lookup and
//! approval failures are folded into `ToolResult` blocks by the executor so
//! the model can react to them.

use std::time::Duration;

/// Failure of a single completion request.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Request(err.to_string())
    }
}

/// Failure reported by a tool implementation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Short machine-readable code, included in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::AccessDenied(_) => "access_denied",
            ToolError::Timeout(_) => "timeout",
            ToolError::Failed(_) => "tool_error",
            ToolError::Io(_) => "io_error",
        }
    }
}

/// Errors surfaced from `ConversationController::run_turn`.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("turn exceeded {0} completion requests")]
    MaxIterations(usize),

    #[error("cancelled")]
    Cancelled,
}

/// Errors from the operator side of the approval gate.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request {0} not found or already resolved")]
    NotPending(uuid::Uuid),
}

/// Coordination transport failures.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// Network registration or browse failed. DiscoveryTransport recovers from
    /// this by falling back to the file transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single status document or service entry could not be decoded.
    #[error("malformed record in {source_name}: {reason}")]
    MalformedRecord { source_name: String, reason: String },

    /// A record the caller tried to publish is unusable (e.g. empty id).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("status directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

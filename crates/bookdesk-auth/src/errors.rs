//! Auth error types.

/// A network-level failure reported by the HTTP transport.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("transport error{}: {}", .status.map(|s| format!(" ({s})")).unwrap_or_default(), .message)]
pub struct TransportError {
    /// HTTP status code, if the failure happened after a response started.
    pub status: Option<u16>,
    /// Error description.
    pub message: String,
}

impl TransportError {
    /// Transport failure without a status code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Errors produced by the session request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Network/DNS-level failure. Never retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The access token was rejected with 401 on a first attempt.
    ///
    /// Drives the refresh protocol; [`SessionPipeline::send`] never returns it.
    ///
    /// [`SessionPipeline::send`]: crate::pipeline::SessionPipeline::send
    #[error("access token expired")]
    AuthExpired,

    /// 401 on a replayed request, or the refresh exchange itself failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Non-success HTTP status surfaced by a JSON helper.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

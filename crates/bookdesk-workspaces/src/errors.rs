//! Cache error types.

use bookdesk_auth::AuthError;

/// Errors surfaced by a membership fetch.
///
/// An unbound cache and results dropped after a rebind or cancellation are
/// reported through [`RefreshOutcome`](crate::types::RefreshOutcome), not here.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The request through the session pipeline failed.
    #[error("membership fetch failed: {0}")]
    Fetch(#[from] AuthError),

    /// The membership payload had an unexpected shape.
    #[error("invalid membership payload: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Session lifecycle events.
//!
//! The pipeline broadcasts an event whenever the signed-in identity changes.
//! Hosts forward them to per-identity caches (`bind_to_user`) and navigate on
//! [`SessionEvent::Ended`].

use crate::types::User;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Explicit sign-out.
    SignedOut,
    /// The refresh exchange failed; the user must sign in again.
    RefreshFailed,
    /// A request was rejected again with a freshly refreshed token.
    Rejected,
}

/// A change of the signed-in identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user signed in, or a refresh reported a different identity.
    Established {
        /// The new identity.
        user: User,
    },
    /// The session was cleared.
    Ended {
        /// Why it ended.
        reason: EndReason,
    },
}

impl SessionEvent {
    /// Event type name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Established { .. } => "session.established",
            Self::Ended { .. } => "session.ended",
        }
    }

    /// Owner key caches should bind to after this event.
    pub fn owner_key(&self) -> Option<&str> {
        match self {
            Self::Established { user } => Some(user.owner_key()),
            Self::Ended { .. } => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

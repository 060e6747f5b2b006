//! # bookdesk-auth
//!
//! Authenticated access to the bookdesk API.
//!
//! The client holds two credentials:
//! - **Access token**: short-lived bearer token kept in the [`Session`]
//! - **Refresh cookie**: long-lived, held by the transport's cookie jar and
//!   never visible to this crate
//!
//! [`SessionPipeline`] attaches the access token to every request and, when the
//! backend answers 401, trades the refresh cookie for a new token exactly once
//! no matter how many requests failed concurrently. Parked requests are
//! replayed with the new token in the order they failed.
//!
//! Session state is persisted through a [`bookdesk_core::RecordStore`] as
//! `session.json`. Identity changes are broadcast as [`SessionEvent`]s.

#![deny(unsafe_code)]

pub mod backend;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod transport;
pub mod types;

pub use errors::{AuthError, TransportError};
pub use events::{EndReason, SessionEvent};
pub use pipeline::SessionPipeline;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use types::{Session, SessionRecord, TokenGrant, User};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

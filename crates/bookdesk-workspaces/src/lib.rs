//! # bookdesk-workspaces
//!
//! Workspace memberships of the signed-in identity, cached per identity.
//!
//! [`WorkspaceCache`] holds a single [`CacheEntry`] tagged with the owner it
//! was fetched for. The host rebinds it on every identity change
//! ([`WorkspaceCache::bind_to_user`]), which wipes the list so one user's
//! workspaces are never shown to another. Reads refetch only when the entry
//! is older than the configured stale time, and each successful fetch repairs
//! the selected workspace so it always points at a list member.
//!
//! Lists come from a [`MembershipSource`]; [`ApiMembershipSource`] reads them
//! through the authenticated [`bookdesk_auth::SessionPipeline`].

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod source;
pub mod types;

pub use cache::WorkspaceCache;
pub use errors::CacheError;
pub use source::{ApiMembershipSource, MembershipSource, normalize_memberships};
pub use types::{
    CacheEntry, DiscardReason, RefreshOutcome, SkipReason, WorkspaceRecord, WorkspaceSummary,
};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

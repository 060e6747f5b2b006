//! Cache data types.

use bookdesk_core::VersionedRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace the signed-in user belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    /// Workspace ID, unique within a list.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl WorkspaceSummary {
    /// Build a summary.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Cached membership list for one owner.
///
/// The content is only meaningful while `owner_key` matches the live identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Identity the content belongs to. `None` means unbound.
    #[serde(default)]
    pub owner_key: Option<String>,
    /// Selected workspace. Not validated until the next fetch.
    #[serde(default)]
    pub current_id: Option<String>,
    /// Memberships in server order.
    #[serde(default)]
    pub list: Vec<WorkspaceSummary>,
    /// Time of the last successful fetch.
    #[serde(default)]
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Empty entry bound to `owner_key`.
    pub fn bound_to(owner_key: Option<&str>) -> Self {
        Self {
            owner_key: owner_key.map(str::to_string),
            ..Self::default()
        }
    }

    /// Whether `id` is in the list.
    pub fn contains(&self, id: &str) -> bool {
        self.list.iter().any(|w| w.id == id)
    }

    /// The selected summary, if it resolves against the list.
    pub fn current(&self) -> Option<&WorkspaceSummary> {
        let id = self.current_id.as_deref()?;
        self.list.iter().find(|w| w.id == id)
    }

    /// Point `current_id` at a list member.
    ///
    /// An unresolvable selection falls back to the first entry; an empty list
    /// clears it.
    pub fn repair_selection(&mut self) {
        match self.list.first() {
            None => self.current_id = None,
            Some(first) => {
                if !self.current_id.as_deref().is_some_and(|id| self.contains(id)) {
                    self.current_id = Some(first.id.clone());
                }
            }
        }
    }

    /// Whether the last fetch is younger than `stale_time` at `now`.
    pub fn is_fresh(&self, stale_time: std::time::Duration, now: DateTime<Utc>) -> bool {
        let Some(fetched) = self.last_fetched_at else {
            return false;
        };
        // A fetch time in the future counts as stale
        (now - fetched).to_std().is_ok_and(|age| age < stale_time)
    }
}

/// Persisted form of [`CacheEntry`] (`workspaces.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    /// Schema version.
    pub version: u32,
    /// Cached entry.
    #[serde(flatten)]
    pub entry: CacheEntry,
}

impl VersionedRecord for WorkspaceRecord {
    const NAME: &'static str = "workspaces";
    const VERSION: u32 = 1;
}

impl From<&CacheEntry> for WorkspaceRecord {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            version: Self::VERSION,
            entry: entry.clone(),
        }
    }
}

/// Why a refresh made no network call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No owner is bound.
    Unbound,
    /// The last fetch is within the stale time.
    Fresh,
}

/// Why fetched results were dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// The caller cancelled before the results were committed.
    Cancelled,
    /// The cache was rebound while the fetch was in flight.
    Rebound,
}

/// Result of a refresh call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing was fetched.
    Skipped(SkipReason),
    /// A fetch was committed to the entry.
    Fetched,
    /// A fetch ran but the entry was left untouched.
    Discarded(DiscardReason),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

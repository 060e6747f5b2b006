//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a user file
//! may contain any subset of fields and missing ones take their default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type for the bookdesk client.
///
/// ```json
/// {
///   "api": { "baseUrl": "https://reservations.example.com/api" },
///   "cache": { "staleTimeMs": 30000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Settings schema version.
    pub version: String,
    /// Backend API endpoints and transport options.
    pub api: ApiSettings,
    /// Workspace membership cache behaviour.
    pub cache: CacheSettings,
    /// Where persisted records live.
    pub storage: StorageSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            api: ApiSettings::default(),
            cache: CacheSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Backend API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL every path is resolved against.
    pub base_url: String,
    /// Credential sign-in endpoint.
    pub login_path: String,
    /// Refresh exchange endpoint (uses the long-lived cookie).
    pub refresh_path: String,
    /// Sign-out endpoint.
    pub logout_path: String,
    /// Workspace membership list endpoint.
    pub workspaces_path: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            logout_path: "/auth/logout".to_string(),
            workspaces_path: "/workspaces".to_string(),
            timeout_ms: 30_000,
            user_agent: "bookdesk/0.1".to_string(),
        }
    }
}

impl ApiSettings {
    /// Resolve `path` against [`base_url`](Self::base_url).
    ///
    /// Absolute URLs are returned unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Workspace membership cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Age after which a cached membership list is refetched.
    pub stale_time_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_time_ms: 60_000,
        }
    }
}

impl CacheSettings {
    /// Staleness window as a [`Duration`].
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }
}

/// Persisted record location.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Directory for `session.json` / `workspaces.json`. Defaults to `~/.bookdesk`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

impl StorageSettings {
    /// Resolve the data directory, falling back to `<home>/.bookdesk`.
    pub fn resolve_data_dir(&self, home: &Path) -> PathBuf {
        self.data_dir
            .as_ref()
            .map_or_else(|| home.join(".bookdesk"), PathBuf::from)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

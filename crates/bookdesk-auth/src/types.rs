//! Session data types.

use bookdesk_core::VersionedRecord;
use serde::{Deserialize, Serialize};

/// The signed-in identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable user ID.
    pub id: String,
    /// Login email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl User {
    /// User with only an ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
        }
    }

    /// Key that scopes per-identity caches to this user.
    pub fn owner_key(&self) -> &str {
        &self.id
    }
}

/// Client session state.
///
/// `access_token == None` means unauthenticated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    /// Short-lived bearer credential.
    pub access_token: Option<String>,
    /// Signed-in identity.
    pub identity: Option<User>,
}

impl Session {
    /// Whether an access token is held.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Owner key of the signed-in identity.
    pub fn owner_key(&self) -> Option<&str> {
        self.identity.as_ref().map(User::owner_key)
    }
}

/// Persisted form of [`Session`] (`session.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Schema version.
    pub version: u32,
    /// Short-lived bearer credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Signed-in identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<User>,
}

impl VersionedRecord for SessionRecord {
    const NAME: &'static str = "session";
    const VERSION: u32 = 1;
}

impl From<&Session> for SessionRecord {
    fn from(session: &Session) -> Self {
        Self {
            version: Self::VERSION,
            access_token: session.access_token.clone(),
            identity: session.identity.clone(),
        }
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            access_token: record.access_token,
            identity: record.identity,
        }
    }
}

/// Body returned by the login and refresh endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    /// New short-lived bearer credential.
    #[serde(alias = "access_token")]
    pub access_token: String,
    /// Identity, when the endpoint returns it.
    #[serde(default)]
    pub user: Option<User>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ignores_unknown_fields() {
        let user: User = serde_json::from_str(
            r#"{"id":"u1","email":"ada@example.com","role":"admin","createdAt":"2024-01-01"}"#,
        )
        .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.owner_key(), "u1");
    }

    #[test]
    fn session_record_field_names() {
        let session = Session {
            access_token: Some("T1".to_string()),
            identity: Some(User::new("u1")),
        };
        let json = serde_json::to_value(SessionRecord::from(&session)).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["accessToken"], "T1");
        assert_eq!(json["identity"]["id"], "u1");
    }

    #[test]
    fn empty_session_record_omits_fields() {
        let json = serde_json::to_value(SessionRecord::from(&Session::default())).unwrap();
        assert_eq!(json, serde_json::json!({"version": 1}));
    }

    #[test]
    fn token_grant_accepts_both_casings() {
        let a: TokenGrant = serde_json::from_str(r#"{"accessToken":"T2"}"#).unwrap();
        let b: TokenGrant = serde_json::from_str(r#"{"access_token":"T2"}"#).unwrap();
        assert_eq!(a, b);
        assert!(a.user.is_none());
    }

    #[test]
    fn session_owner_key() {
        assert_eq!(Session::default().owner_key(), None);
        let session = Session {
            access_token: None,
            identity: Some(User::new("u9")),
        };
        assert_eq!(session.owner_key(), Some("u9"));
        assert!(!session.is_authenticated());
    }
}

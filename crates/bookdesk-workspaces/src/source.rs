//! Where membership lists come from.

use std::collections::HashSet;

use async_trait::async_trait;
use bookdesk_auth::SessionPipeline;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::CacheError;
use crate::types::WorkspaceSummary;

/// Fetches the membership list for the signed-in identity.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Fetch memberships for `owner_key`.
    async fn fetch_memberships(&self, owner_key: &str) -> Result<Vec<WorkspaceSummary>, CacheError>;
}

/// Membership source backed by the API through a [`SessionPipeline`].
///
/// The owner is implied by the pipeline's access token; `owner_key` is only
/// used for logging.
pub struct ApiMembershipSource {
    pipeline: SessionPipeline,
    path: String,
}

impl ApiMembershipSource {
    /// Source reading the configured workspaces path.
    pub fn new(pipeline: SessionPipeline) -> Self {
        let path = pipeline.api().workspaces_path.clone();
        Self { pipeline, path }
    }
}

#[async_trait]
impl MembershipSource for ApiMembershipSource {
    #[tracing::instrument(skip_all, fields(owner = owner_key))]
    async fn fetch_memberships(&self, owner_key: &str) -> Result<Vec<WorkspaceSummary>, CacheError> {
        let payload: Value = self.pipeline.get_json(&self.path).await?;
        let list = normalize_memberships(payload)?;
        tracing::debug!(count = list.len(), "memberships fetched");
        Ok(list)
    }
}

#[derive(Deserialize)]
struct MembershipItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    deleted: bool,
}

/// Turn a membership payload into a list with unique ids.
///
/// Accepts a bare array or a `{ "workspaces": [...] }` envelope. Items marked
/// `deleted` are dropped and repeated ids keep their first occurrence.
pub fn normalize_memberships(payload: Value) -> Result<Vec<WorkspaceSummary>, CacheError> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("workspaces") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(CacheError::Decode(
                    "object payload without a `workspaces` array".to_string(),
                ));
            }
        },
        other => {
            return Err(CacheError::Decode(format!(
                "expected an array, got {}",
                kind(&other)
            )));
        }
    };

    let mut seen = HashSet::new();
    let mut list = Vec::with_capacity(items.len());
    for item in items {
        let item: MembershipItem = serde_json::from_value(item)?;
        if item.deleted || !seen.insert(item.id.clone()) {
            continue;
        }
        list.push(WorkspaceSummary {
            id: item.id,
            name: item.name,
        });
    }
    Ok(list)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

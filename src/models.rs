use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{LibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct VersionId(pub Uuid);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for VersionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct NodeId(pub Uuid);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Stable identifier of a graph node within one version.
///
/// Keys coming from the server are taken as-is; keys typed by an editor go
/// through [`NodeKey::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    /// Normalizes free text to the slug pattern `[a-z0-9_-]+`.
    pub fn normalize(raw: &str) -> Result<Self> {
        let mut slug = String::with_capacity(raw.len());
        let mut pending_dash = false;
        for ch in raw.trim().chars() {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(ch);
            } else if ch == '-' || ch.is_whitespace() || ch.is_ascii_punctuation() {
                pending_dash = true;
            }
        }

        if slug.is_empty() {
            return Err(LibError::invalid(
                "Node key is required",
                anyhow!("key {:?} normalizes to an empty slug", raw),
            ));
        }
        Ok(Self(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    #[default]
    Normal,
    End,
}

impl NodeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Normal => "normal",
            NodeType::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestNode {
    pub key: NodeKey,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default = "empty_document")]
    pub content: Value,
    #[serde(default)]
    pub rewards: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestEdge {
    pub from_key: NodeKey,
    pub to_key: NodeKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl QuestEdge {
    pub fn new(from_key: NodeKey, to_key: NodeKey) -> Self {
        Self {
            from_key,
            to_key,
            label: None,
            condition: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    #[default]
    Draft,
    Published,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub id: VersionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quest_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i64>,
    #[serde(default)]
    pub status: VersionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl VersionMeta {
    pub fn draft(id: VersionId) -> Self {
        Self {
            id,
            quest_id: None,
            number: None,
            status: VersionStatus::Draft,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionGraph {
    pub version: VersionMeta,
    #[serde(default)]
    pub nodes: Vec<QuestNode>,
    #[serde(default)]
    pub edges: Vec<QuestEdge>,
}

/// Errors and warnings about a graph. Message order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AutofixResult {
    #[serde(default)]
    pub changes: Vec<String>,
}

/// Content record edited through the single-node editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default)]
    pub title: String,
    #[serde(default = "empty_document")]
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Opaque concurrency token owned by the server.
    #[serde(default)]
    pub version: i64,
}

/// Fields a client never sends back in a partial update.
pub const SERVER_OWNED_FIELDS: &[&str] = &["id", "updated_at", "version"];

/// Filter, sort and paging parameters of a list read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListQuery {
    pub filters: Vec<(String, String)>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((name.into(), value.into()));
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page.max(1));
        self.limit = Some(limit.clamp(1, 200));
        self
    }

    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.filters.clone();
        if let Some(sort) = &self.sort {
            pairs.push(("sort".to_string(), sort.clone()));
        }
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope<T> {
    Bare(Vec<T>),
    Items { items: Vec<T> },
    Workspaces { workspaces: Vec<T> },
}

/// Decodes every list body shape the backend is known to emit into one `Vec`.
pub fn decode_list<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>> {
    let envelope: ListEnvelope<T> = serde_json::from_slice(body).map_err(|err| {
        LibError::decode(
            "List response has an unrecognized shape",
            anyhow!("list decode failed: {}", err),
        )
    })?;
    Ok(match envelope {
        ListEnvelope::Bare(items) => items,
        ListEnvelope::Items { items } => items,
        ListEnvelope::Workspaces { workspaces } => workspaces,
    })
}

/// Top-level fields of `after` that differ from `before`, skipping server-owned fields.
pub fn changed_fields<T: Serialize>(before: &T, after: &T) -> Result<Map<String, Value>> {
    let before = as_object(serde_json::to_value(before)?)?;
    let after = as_object(serde_json::to_value(after)?)?;

    let mut changed = Map::new();
    for (field, value) in after {
        if SERVER_OWNED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        if before.get(&field) != Some(&value) {
            changed.insert(field, value);
        }
    }
    Ok(changed)
}

pub(crate) fn as_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(LibError::decode(
            "Expected a JSON object",
            anyhow!("value {} is not an object", other),
        )),
    }
}

fn empty_document() -> Value {
    json!({})
}

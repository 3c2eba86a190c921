use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::EditorConfig;
use crate::error::{LibError, Result};
use crate::models::{NodeId, NodeRecord, SERVER_OWNED_FIELDS, as_object};

pub fn draft_key(id: NodeId) -> String {
    format!("node-draft-{id}")
}

pub fn content_key(id: NodeId) -> String {
    format!("node-content-{id}")
}

#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>>;

    async fn write(&self, key: &str, value: &Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    entries: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned())
    }

    async fn write(&self, key: &str, value: &Value) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(LibError::invalid(
                "Draft key contains invalid characters",
                anyhow!("invalid draft key {:?}", key),
            ));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Typed access to the `node-draft-{id}` / `node-content-{id}` entries.
pub struct LocalDrafts<S> {
    store: S,
}

impl LocalDrafts<FileDraftStore> {
    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(FileDraftStore::new(config.draft_dir.clone()))
    }
}

impl<S: DraftStore> LocalDrafts<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn save_draft(&self, record: &NodeRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store.write(&draft_key(record.id), &value).await
    }

    pub async fn load_draft(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        match self.store.read(&draft_key(id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn save_content(&self, id: NodeId, content: &Value) -> Result<()> {
        self.store.write(&content_key(id), content).await
    }

    pub async fn load_content(&self, id: NodeId) -> Result<Option<Value>> {
        self.store.read(&content_key(id)).await
    }

    pub async fn clear(&self, id: NodeId) -> Result<()> {
        self.store.remove(&draft_key(id)).await?;
        self.store.remove(&content_key(id)).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub local: Option<Value>,
    pub remote: Option<Value>,
}

/// Top-level fields where the local draft and the remote record disagree,
/// sorted by field name.
pub fn diff_against_remote(local: &NodeRecord, remote: &NodeRecord) -> Result<Vec<FieldDiff>> {
    let local = as_object(serde_json::to_value(local)?)?;
    let remote = as_object(serde_json::to_value(remote)?)?;

    let fields: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    Ok(fields
        .into_iter()
        .filter(|field| !SERVER_OWNED_FIELDS.contains(&field.as_str()))
        .filter(|field| local.get(*field) != remote.get(*field))
        .map(|field| FieldDiff {
            field: field.clone(),
            local: local.get(field).cloned(),
            remote: remote.get(field).cloned(),
        })
        .collect())
}

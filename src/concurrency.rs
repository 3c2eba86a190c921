use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use serde_json::{Map, Value};
use tokio::task::AbortHandle;

use crate::client::NodeRemote;
use crate::error::{LibError, Result};
use crate::models::{NodeId, NodeRecord, changed_fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Ask the server to build on the latest known version. Defaults to `true`.
    pub next: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self { next: true }
    }
}

struct EditorState {
    snapshot: NodeRecord,
    current: NodeRecord,
    generation: u64,
    pending: Option<AbortHandle>,
}

/// Only the most recently dispatched save may update local state.
pub struct NodeEditor {
    remote: Arc<dyn NodeRemote>,
    id: NodeId,
    state: Mutex<EditorState>,
}

impl NodeEditor {
    pub async fn load(remote: Arc<dyn NodeRemote>, id: NodeId) -> Result<Self> {
        let record = remote.get_node(id).await?;
        Ok(Self::from_record(remote, record))
    }

    pub fn from_record(remote: Arc<dyn NodeRemote>, record: NodeRecord) -> Self {
        Self {
            remote,
            id: record.id,
            state: Mutex::new(EditorState {
                snapshot: record.clone(),
                current: record,
                generation: 0,
                pending: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn current(&self) -> NodeRecord {
        self.lock().current.clone()
    }

    /// Last state confirmed by the server.
    pub fn snapshot(&self) -> NodeRecord {
        self.lock().snapshot.clone()
    }

    pub fn update(&self, edit: impl FnOnce(&mut NodeRecord)) {
        edit(&mut self.lock().current);
    }

    pub fn discard_changes(&self) {
        let mut state = self.lock();
        state.current = state.snapshot.clone();
    }

    pub fn changed_fields(&self) -> Result<Map<String, Value>> {
        let state = self.lock();
        changed_fields(&state.snapshot, &state.current)
    }

    pub fn is_dirty(&self) -> bool {
        self.changed_fields()
            .map(|fields| !fields.is_empty())
            .unwrap_or(true)
    }

    /// Sends only the fields changed since the last confirmed snapshot.
    ///
    /// Returns `Ok(None)` when there is nothing to send.
    pub async fn save(&self, options: PatchOptions) -> Result<Option<NodeRecord>> {
        let fields = {
            let mut state = self.lock();
            abort_pending(&mut state);
            changed_fields(&state.snapshot, &state.current)?
        };
        if fields.is_empty() {
            return Ok(None);
        }
        self.patch(fields, options).await.map(Some)
    }

    /// Dispatches a partial update, superseding any save still in flight.
    pub async fn patch(
        &self,
        fields: Map<String, Value>,
        options: PatchOptions,
    ) -> Result<NodeRecord> {
        let remote = Arc::clone(&self.remote);
        let id = self.id;
        let (handle, generation, sent) = {
            let mut state = self.lock();
            abort_pending(&mut state);
            state.generation += 1;
            let handle =
                tokio::spawn(async move { remote.patch_node(id, fields, options.next).await });
            state.pending = Some(handle.abort_handle());
            (handle, state.generation, state.current.clone())
        };
        tracing::debug!(node_id = %id, generation, next = options.next, "node save dispatched");

        let saved = match handle.await {
            Ok(result) => result?,
            Err(err) if err.is_cancelled() => {
                return Err(superseded(id, generation));
            }
            Err(err) => {
                return Err(LibError::unknown("Save task failed", anyhow!(err)));
            }
        };

        let mut state = self.lock();
        if state.generation != generation {
            return Err(superseded(id, generation));
        }
        state.pending = None;
        if state.current == sent {
            state.current = saved.clone();
        }
        state.snapshot = saved.clone();
        tracing::debug!(node_id = %id, version = saved.version, "node save applied");
        Ok(saved)
    }
}

impl Drop for NodeEditor {
    fn drop(&mut self) {
        abort_pending(&mut self.lock());
    }
}

fn abort_pending(state: &mut EditorState) {
    if let Some(pending) = state.pending.take() {
        pending.abort();
    }
}

fn superseded(id: NodeId, generation: u64) -> LibError {
    LibError::cancelled(
        "Save was superseded by a newer save",
        anyhow!("save {} for node {} superseded", generation, id),
    )
}

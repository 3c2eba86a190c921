pub mod algorithms;
pub mod autosave;
pub mod cache;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod drafts;
pub mod error;
pub mod graph;
pub mod invariants;
pub mod models;
#[cfg(feature = "stub-server")]
pub mod stub;
pub mod transport;

pub mod prelude {
    pub use crate::algorithms::{adjacency_map, reachable_from};
    pub use crate::autosave::{
        AutosaveController, SyncState, SyncStatus, Toast, ToastLevel,
    };
    pub use crate::cache::{EtagCache, ListResolver, RouteKind};
    pub use crate::client::{GraphRemote, NodeRemote, QuestApi};
    pub use crate::concurrency::{NodeEditor, PatchOptions};
    pub use crate::config::EditorConfig;
    pub use crate::drafts::{DraftStore, FileDraftStore, LocalDrafts, diff_against_remote};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::graph::GraphModel;
    pub use crate::invariants::{GraphViolation, Severity};
    pub use crate::models::{
        AutofixResult, ListQuery, NodeId, NodeKey, NodeRecord, NodeType, QuestEdge, QuestNode,
        ValidationReport, VersionGraph, VersionId, VersionMeta, VersionStatus,
    };
    #[cfg(feature = "stub-server")]
    pub use crate::stub::StubBackend;
    pub use crate::transport::{ReqwestTransport, Transport};
}

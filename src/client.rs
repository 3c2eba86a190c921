use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};

use crate::config::EditorConfig;
use crate::error::Result;
use crate::models::{AutofixResult, NodeId, NodeRecord, ValidationReport, VersionGraph, VersionId};
use crate::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

/// Remote side of the version graph editor.
#[async_trait]
pub trait GraphRemote: Send + Sync {
    async fn load_graph(&self, version_id: VersionId) -> Result<VersionGraph>;

    /// Replaces the stored graph; there is no partial graph update.
    async fn put_graph(&self, version_id: VersionId, graph: &VersionGraph) -> Result<()>;

    async fn validate(&self, version_id: VersionId) -> Result<ValidationReport>;

    async fn autofix(&self, version_id: VersionId) -> Result<AutofixResult>;

    async fn publish(&self, version_id: VersionId) -> Result<()>;
}

/// Remote side of the single-node editor.
#[async_trait]
pub trait NodeRemote: Send + Sync {
    async fn get_node(&self, id: NodeId) -> Result<NodeRecord>;

    /// Partial update. `next` asks the server to apply the patch on top of the
    /// latest known version of the record.
    async fn patch_node(
        &self,
        id: NodeId,
        fields: Map<String, Value>,
        next: bool,
    ) -> Result<NodeRecord>;
}

#[derive(Clone)]
pub struct QuestApi {
    transport: Arc<dyn Transport>,
    base_url: String,
    workspace_id: Option<String>,
}

impl QuestApi {
    pub fn new(transport: Arc<dyn Transport>, config: &EditorConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            workspace_id: config.workspace_id.clone(),
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(Arc::new(ReqwestTransport::default()), config)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    fn version_url(&self, version_id: VersionId) -> String {
        format!("{}/admin/quests/versions/{}", self.base_url, version_id)
    }

    fn node_url(&self, id: NodeId) -> String {
        format!("{}/admin/nodes/{}", self.base_url, id)
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = request.url.clone();
        let request = request.workspace(self.workspace_id.as_deref());
        self.transport.send(request).await?.error_for_status(&url)
    }
}

#[async_trait]
impl GraphRemote for QuestApi {
    async fn load_graph(&self, version_id: VersionId) -> Result<VersionGraph> {
        self.send(ApiRequest::get(self.version_url(version_id)))
            .await?
            .json()
    }

    async fn put_graph(&self, version_id: VersionId, graph: &VersionGraph) -> Result<()> {
        let url = format!("{}/graph", self.version_url(version_id));
        let body = serde_json::to_value(graph)?;
        self.send(ApiRequest::new(Method::PUT, url).json(body)).await?;
        Ok(())
    }

    async fn validate(&self, version_id: VersionId) -> Result<ValidationReport> {
        let url = format!("{}/validate", self.version_url(version_id));
        self.send(ApiRequest::new(Method::POST, url)).await?.json()
    }

    async fn autofix(&self, version_id: VersionId) -> Result<AutofixResult> {
        let url = format!("{}/autofix", self.version_url(version_id));
        let response = self.send(ApiRequest::new(Method::POST, url)).await?;
        if response.body.is_empty() {
            return Ok(AutofixResult::default());
        }
        response.json()
    }

    async fn publish(&self, version_id: VersionId) -> Result<()> {
        let url = format!("{}/publish", self.version_url(version_id));
        self.send(ApiRequest::new(Method::POST, url)).await?;
        Ok(())
    }
}

#[async_trait]
impl NodeRemote for QuestApi {
    async fn get_node(&self, id: NodeId) -> Result<NodeRecord> {
        self.send(ApiRequest::get(self.node_url(id))).await?.json()
    }

    async fn patch_node(
        &self,
        id: NodeId,
        fields: Map<String, Value>,
        next: bool,
    ) -> Result<NodeRecord> {
        let url = format!("{}?next={}", self.node_url(id), next);
        self.send(ApiRequest::new(Method::PATCH, url).json(Value::Object(fields)))
            .await?
            .json()
    }
}

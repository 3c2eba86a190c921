use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::cache::RouteKind;
use crate::error::{ErrorKind, LibError};
use crate::invariants;
use crate::models::{
    AutofixResult, NodeId, NodeRecord, SERVER_OWNED_FIELDS, VersionGraph, VersionId,
    VersionStatus, as_object,
};

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::InvalidInput
            | ErrorKind::DuplicateKey
            | ErrorKind::SelfLoop
            | ErrorKind::DuplicateEdge
            | ErrorKind::Decode => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Http => self
                .0
                .status
                .and_then(|status| StatusCode::from_u16(status).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ErrorKind::Cancelled | ErrorKind::Io | ErrorKind::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        tracing::error!(kind = ?self.0.kind, error = %self.0.source, "stub request failed");
        (status, self.0.public).into_response()
    }
}

type HandlerResult<T> = Result<T, AppError>;

#[derive(Debug, Default)]
struct StubState {
    versions: HashMap<VersionId, VersionGraph>,
    nodes: Vec<NodeRecord>,
    stale_nodes: HashSet<NodeId>,
    list_revision: u64,
    disabled_routes: HashSet<RouteKind>,
    graph_puts: Vec<VersionGraph>,
    failing_puts: usize,
}

/// Shared handle to the stub's state. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_version(&self, graph: VersionGraph) {
        self.lock().versions.insert(graph.version.id, graph);
    }

    pub fn version(&self, id: VersionId) -> Option<VersionGraph> {
        self.lock().versions.get(&id).cloned()
    }

    pub fn insert_node(&self, record: NodeRecord) {
        let mut state = self.lock();
        state.nodes.retain(|node| node.id != record.id);
        state.nodes.push(record);
        state.list_revision += 1;
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.lock().nodes.iter().find(|node| node.id == id).cloned()
    }

    /// Simulates another editor saving `id`: bumps its version and makes
    /// `next=false` patches against it fail with 409.
    pub fn touch_node(&self, id: NodeId) {
        let mut state = self.lock();
        if let Some(node) = state.nodes.iter_mut().find(|node| node.id == id) {
            node.version += 1;
            node.updated_at = Some(Utc::now());
            state.stale_nodes.insert(id);
            state.list_revision += 1;
        }
    }

    /// Makes one list route answer 404, as on deployments that lack it.
    pub fn disable_route(&self, route: RouteKind) {
        self.lock().disabled_routes.insert(route);
    }

    pub fn fail_next_puts(&self, count: usize) {
        self.lock().failing_puts = count;
    }

    pub fn graph_puts(&self) -> Vec<VersionGraph> {
        self.lock().graph_puts.clone()
    }

    pub fn list_etag(&self) -> String {
        format!("\"nodes-{}\"", self.lock().list_revision)
    }

    fn version_graph(&self, id: VersionId) -> Result<VersionGraph, LibError> {
        self.version(id).ok_or_else(|| {
            LibError::not_found("Version not found", anyhow!("no version {}", id))
        })
    }
}

async fn get_version_handler(
    State(app): State<StubBackend>,
    Path(version_id): Path<VersionId>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(app.version_graph(version_id)?))
}

async fn put_graph_handler(
    State(app): State<StubBackend>,
    Path(version_id): Path<VersionId>,
    Json(mut graph): Json<VersionGraph>,
) -> HandlerResult<impl IntoResponse> {
    let mut state = app.lock();
    if state.failing_puts > 0 {
        state.failing_puts -= 1;
        return Err(LibError::from_status(503, "stub://graph", "graph store unavailable").into());
    }
    let Some(stored) = state.versions.get_mut(&version_id) else {
        return Err(LibError::not_found("Version not found", anyhow!("no version {}", version_id)).into());
    };
    if stored.version.status == VersionStatus::Published {
        return Err(LibError::conflict(
            "Published versions are read-only",
            anyhow!("version {} is published", version_id),
        )
        .into());
    }

    graph.version = stored.version.clone();
    graph.version.updated_at = Some(Utc::now());
    *stored = graph.clone();
    state.graph_puts.push(graph);
    tracing::debug!(%version_id, "graph stored");
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_handler(
    State(app): State<StubBackend>,
    Path(version_id): Path<VersionId>,
) -> HandlerResult<impl IntoResponse> {
    let graph = app.version_graph(version_id)?;
    Ok(Json(invariants::authoritative_report(&graph.nodes, &graph.edges)))
}

async fn autofix_handler(
    State(app): State<StubBackend>,
    Path(version_id): Path<VersionId>,
) -> HandlerResult<impl IntoResponse> {
    let mut state = app.lock();
    let Some(graph) = state.versions.get_mut(&version_id) else {
        return Err(LibError::not_found("Version not found", anyhow!("no version {}", version_id)).into());
    };
    let changes = invariants::repair_graph(&mut graph.nodes, &mut graph.edges);
    Ok(Json(AutofixResult { changes }))
}

async fn publish_handler(
    State(app): State<StubBackend>,
    Path(version_id): Path<VersionId>,
) -> HandlerResult<impl IntoResponse> {
    let mut state = app.lock();
    let Some(graph) = state.versions.get_mut(&version_id) else {
        return Err(LibError::not_found("Version not found", anyhow!("no version {}", version_id)).into());
    };
    let report = invariants::authoritative_report(&graph.nodes, &graph.edges);
    if !report.ok {
        return Err(LibError::invalid(
            "Version has validation errors",
            anyhow!("{} errors", report.errors.len()),
        )
        .into());
    }
    graph.version.status = VersionStatus::Published;
    graph.version.updated_at = Some(Utc::now());
    tracing::info!(%version_id, "version published");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct WorkspaceQuery {
    workspace_id: Option<String>,
}

fn list_response(
    app: &StubBackend,
    route: RouteKind,
    headers: &HeaderMap,
    shape: fn(Vec<NodeRecord>) -> Value,
) -> Response {
    let state = app.lock();
    if state.disabled_routes.contains(&route) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let etag = format!("\"nodes-{}\"", state.list_revision);
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == etag);
    if unchanged {
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
    }

    let body = shape(state.nodes.clone());
    ([(header::ETAG, etag)], Json(body)).into_response()
}

async fn workspace_nodes_handler(
    State(app): State<StubBackend>,
    Path(_workspace_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    list_response(&app, RouteKind::PathScoped, &headers, |nodes| json!(nodes))
}

async fn admin_nodes_handler(
    State(app): State<StubBackend>,
    Query(query): Query<WorkspaceQuery>,
    headers: HeaderMap,
) -> Response {
    tracing::debug!(workspace_id = ?query.workspace_id, "admin node list");
    list_response(&app, RouteKind::QueryScoped, &headers, |nodes| {
        json!({ "items": nodes })
    })
}

async fn public_nodes_handler(State(app): State<StubBackend>, headers: HeaderMap) -> Response {
    list_response(&app, RouteKind::Public, &headers, |nodes| {
        json!({ "workspaces": nodes })
    })
}

async fn get_node_handler(
    State(app): State<StubBackend>,
    Path(node_id): Path<NodeId>,
) -> HandlerResult<impl IntoResponse> {
    let node = app
        .node(node_id)
        .ok_or_else(|| LibError::not_found("Node not found", anyhow!("no node {}", node_id)))?;
    Ok(Json(node))
}

#[derive(Debug, Deserialize)]
struct PatchQuery {
    next: Option<bool>,
}

async fn patch_node_handler(
    State(app): State<StubBackend>,
    Path(node_id): Path<NodeId>,
    Query(query): Query<PatchQuery>,
    Json(fields): Json<Map<String, Value>>,
) -> HandlerResult<impl IntoResponse> {
    let next = query.next.unwrap_or(true);
    let mut state = app.lock();
    if !next && state.stale_nodes.contains(&node_id) {
        return Err(LibError::conflict(
            "Node was changed by someone else",
            anyhow!("stale patch for node {}", node_id),
        )
        .into());
    }

    let Some(index) = state.nodes.iter().position(|node| node.id == node_id) else {
        return Err(LibError::not_found("Node not found", anyhow!("no node {}", node_id)).into());
    };
    let current = &state.nodes[index];
    let mut merged = as_object(serde_json::to_value(current).map_err(LibError::from)?)?;
    for (field, value) in fields {
        if !SERVER_OWNED_FIELDS.contains(&field.as_str()) {
            merged.insert(field, value);
        }
    }
    let mut updated: NodeRecord =
        serde_json::from_value(Value::Object(merged)).map_err(LibError::from)?;
    updated.version = current.version + 1;
    updated.updated_at = Some(Utc::now());

    state.nodes[index] = updated.clone();
    state.stale_nodes.remove(&node_id);
    state.list_revision += 1;
    Ok(Json(updated))
}

pub fn routes() -> Router<StubBackend> {
    tracing::info!("Registering route /admin/quests/versions/{{version_id}} [GET]");
    tracing::info!("Registering route /admin/quests/versions/{{version_id}}/graph [PUT]");
    tracing::info!("Registering route /admin/nodes/{{node_id}} [GET,PATCH]");

    Router::new()
        .route(
            "/admin/quests/versions/{version_id}",
            get(get_version_handler),
        )
        .route(
            "/admin/quests/versions/{version_id}/graph",
            put(put_graph_handler),
        )
        .route(
            "/admin/quests/versions/{version_id}/validate",
            post(validate_handler),
        )
        .route(
            "/admin/quests/versions/{version_id}/autofix",
            post(autofix_handler),
        )
        .route(
            "/admin/quests/versions/{version_id}/publish",
            post(publish_handler),
        )
        .route(
            "/admin/workspaces/{workspace_id}/nodes",
            get(workspace_nodes_handler),
        )
        .route("/admin/nodes", get(admin_nodes_handler))
        .route(
            "/admin/nodes/{node_id}",
            get(get_node_handler).patch(patch_node_handler),
        )
        .route("/nodes", get(public_nodes_handler))
}

/// Stub router nested under `base_path`, ready to serve.
pub fn app(backend: StubBackend, base_path: &str) -> Router {
    Router::new()
        .nest(base_path, routes())
        .with_state(backend)
}

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::routing::get;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use quest_graph::cache::RouteKind;
use quest_graph::models::{
    NodeId, NodeRecord, NodeType, QuestEdge, QuestNode, VersionGraph, VersionId, VersionMeta,
};
use quest_graph::stub::{self, StubBackend};

const DEMO_VERSION_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = env::var("QUEST_STUB_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid QUEST_STUB_BIND '{}'", bind))?;
    let base_path = env::var("QUEST_STUB_BASE_PATH").unwrap_or_else(|_| "/api".to_string());

    let backend = StubBackend::new();
    seed(&backend);
    if env_flag("QUEST_STUB_LEGACY_ROUTES") {
        backend.disable_route(RouteKind::PathScoped);
    }

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .merge(stub::app(backend, &base_path));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    println!("quest stub backend listening on http://{}", bind_addr);
    println!("api base path: {}", base_path);
    println!(
        "demo version: {}/admin/quests/versions/{}",
        base_path, DEMO_VERSION_ID
    );
    println!("set QUEST_STUB_LEGACY_ROUTES=true to drop the workspace-scoped list route");

    axum::serve(listener, app)
        .await
        .context("stub backend failed")
}

fn seed(backend: &StubBackend) {
    let node = |key: &str, title: &str, node_type| QuestNode {
        key: key.into(),
        title: title.to_string(),
        node_type,
        content: json!({}),
        rewards: None,
    };

    backend.insert_version(VersionGraph {
        version: VersionMeta::draft(VersionId(DEMO_VERSION_ID)),
        nodes: vec![
            node("intro", "Arrive at the village", NodeType::Start),
            node("cave", "Explore the cave", NodeType::Normal),
            node("reward", "Claim the reward", NodeType::End),
        ],
        edges: vec![
            QuestEdge::new("intro".into(), "cave".into()),
            QuestEdge::new("cave".into(), "reward".into()),
        ],
    });

    for title in ["Village elder", "Cave entrance"] {
        backend.insert_node(NodeRecord {
            id: NodeId(Uuid::new_v4()),
            title: title.to_string(),
            content: json!({"blocks": []}),
            tags: Vec::new(),
            is_visible: true,
            updated_at: None,
            version: 1,
        });
    }
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        Err(_) => false,
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

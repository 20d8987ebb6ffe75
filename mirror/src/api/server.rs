//! HTTP surface: the realtime gateway route and a health report.

use axum::{extract::State, http::Method, routing::get, Json, Router};
use rpc_wrpc::NodeConnection;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::database::{BlockQueries, Database};
use crate::error::{MirrorError, Result};
use crate::indexer::SyncService;
use crate::websocket::server::ws_handler;
use crate::websocket::ClientRegistry;

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
    pub registry: ClientRegistry,
    pub sync: Arc<SyncService>,
    pub node: NodeConnection,
}

pub struct ApiServer {
    state: AppState,
    address: String,
}

impl ApiServer {
    pub fn new(state: AppState, address: impl Into<String>) -> Self {
        Self {
            state,
            address: address.into(),
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serves until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.address)
            .await
            .map_err(|e| MirrorError::Internal(format!("Failed to bind {}: {}", self.address, e)))?;

        tracing::info!("Gateway listening on {}", self.address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MirrorError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    state.database.ping().await?;
    let blocks = BlockQueries::count(state.database.pool()).await?;
    let tip = BlockQueries::latest(state.database.pool()).await?.map(|block| block.number);

    let mut topics = Map::new();
    for (topic, topic_state) in state.sync.topic_states().await {
        topics.insert(topic.to_string(), json!(topic_state.as_str()));
    }

    Ok(Json(json!({
        "status": "ok",
        "node": {
            "url": state.node.url(),
            "state": state.node.state().as_str(),
            "reconnectPending": state.node.reconnect_pending(),
        },
        "topics": topics,
        "clients": state.registry.client_count().await,
        "indexedBlocks": blocks,
        "tipNumber": tip,
    })))
}

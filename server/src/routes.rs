//! HTTP surface: the live WebSocket endpoint and the polling snapshot

use crate::session::{handle_socket, SessionManager};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use livelink_shared::lifecycle;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router(sessions: Arc<SessionManager>) -> Router {
    Router::new()
        .route(lifecycle::LIVE_PATH, get(live_handler))
        .route(lifecycle::SNAPSHOT_PATH, get(snapshot_handler))
        .with_state(sessions)
}

/// GET /ws/live/ - WebSocket upgrade
async fn live_handler(ws: WebSocketUpgrade, State(sessions): State<Arc<SessionManager>>) -> Response {
    debug!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, sessions))
}

/// GET /api/live/snapshot/ - state for clients that fell back to polling
async fn snapshot_handler(State(sessions): State<Arc<SessionManager>>) -> Json<Value> {
    Json(json!({
        "presence": sessions.presence().await,
        "connections": sessions.count().await,
        "generated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

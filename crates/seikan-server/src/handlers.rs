//! HTTP handlers

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    Json,
};
use tracing::debug;

use seikan_control::TunnelHandler;
use seikan_proto::{ProbeResponse, StatusResponse};

use crate::socket;

/// Shared state for all routes
pub struct AppState {
    pub handler: TunnelHandler,
    pub max_message_size: usize,
    pub close_grace: std::time::Duration,
}

/// Liveness probe, used by clients to pick a compatible mediator
pub async fn probe() -> Json<ProbeResponse> {
    Json(ProbeResponse::default())
}

/// Mediator status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let stats = state.handler.stats();
    Json(StatusResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        waiting_tunnels: stats.waiting,
        active_tunnels: stats.active,
    })
}

/// Upgrade to the mediator WebSocket
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!("WebSocket upgrade requested");
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| socket::serve_socket(socket, state))
}

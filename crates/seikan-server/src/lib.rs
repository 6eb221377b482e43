//! WebSocket transport for the seikan mediator
//!
//! Serves the liveness probe, a status document and the WebSocket endpoint
//! endpoints use to create, join and relay through tunnels.

pub mod config;
pub mod handlers;
mod socket;

pub use config::{ServerConfig, DEFAULT_PORT};

use std::future::Future;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use seikan_control::TunnelHandler;
use seikan_proto::{PROBE_PATH, STATUS_PATH, WS_PATH};

use handlers::AppState;

pub struct MediatorServer {
    config: ServerConfig,
    handler: TunnelHandler,
}

impl MediatorServer {
    pub fn new(config: ServerConfig) -> Self {
        let handler = TunnelHandler::new(config.mediator.clone());
        Self { config, handler }
    }

    /// Serve an existing handler, e.g. one with a scripted id generator
    pub fn with_handler(config: ServerConfig, handler: TunnelHandler) -> Self {
        Self { config, handler }
    }

    pub fn handler(&self) -> &TunnelHandler {
        &self.handler
    }

    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            handler: self.handler.clone(),
            max_message_size: self.config.max_message_size,
            close_grace: self.config.close_grace,
        });

        // The probe is always reachable from browsers
        let probe = Router::new()
            .route(PROBE_PATH, get(handlers::probe))
            .layer(allow_all_origins());

        let mut api = Router::new()
            .route(STATUS_PATH, get(handlers::status))
            .route(WS_PATH, get(handlers::ws_handler))
            .with_state(state);
        if self.config.enable_cors {
            api = api.layer(allow_all_origins());
        }

        probe.merge(api).layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let addr = listener.local_addr()?;

        info!("Seikan mediator listening on {}", addr);
        info!("Probe: http://{}{}", addr, PROBE_PATH);
        info!("WebSocket: ws://{}{}", addr, WS_PATH);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        info!(
            live_tunnels = self.handler.registry().len(),
            "Seikan mediator stopped accepting connections"
        );
        Ok(())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", self.config.bind_addr, e))?;
        self.serve(listener, shutdown).await
    }
}

fn allow_all_origins() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any)
}

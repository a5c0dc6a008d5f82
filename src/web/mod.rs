//! Gateway inbound surface.
//!
//! Remote configuration, acknowledgment and touch injection all become
//! [`ControlEvent`]s on the control loop's queue; reads come from the
//! latest published [`DeviceStatus`].

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::control::{ControlEvent, DeviceStatus};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub events: mpsc::Sender<ControlEvent>,
    pub status: watch::Receiver<DeviceStatus>,
}

/// HTTP server for the gateway.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        events: mpsc::Sender<ControlEvent>,
        status: watch::Receiver<DeviceStatus>,
    ) -> Self {
        Self {
            config,
            state: AppState { events, status },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/status", get(handlers::handle_status))
            .route(
                "/api/config",
                get(handlers::handle_get_config).put(handlers::handle_update_config),
            )
            .route("/api/touch", post(handlers::handle_touch))
            .route("/api/acknowledge", post(handlers::handle_acknowledge))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

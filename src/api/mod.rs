//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the HTTP surface of the bridge using Axum.
// It provides event ingress, the WebSocket endpoint and a health check.
//
// | Component      | Description                                                |
// |----------------|------------------------------------------------------------|
// | API            | Main API structure coordinating routes and services        |
// | Routes         | Handler functions for HTTP endpoints                       |
// | WS             | WebSocket upgrade and client control frames                |
// | DTOs           | Data transfer objects for API requests/responses           |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name           | Description                                       | Key Methods       |
// |----------------|---------------------------------------------------|-------------------|
// | AppState       | Shared application state                          | new               |
// | Api            | Main API structure                                | routes, serve     |
// | Error          | API error types                                   | from              |
//--------------------------------------------------------------------------------------------------

mod dto;
mod error;
mod routes;
pub mod ws;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{domain::SubscriptionHub, outbounds::EventPublisher};

pub use dto::*;
pub use error::{ApiError, ApiResult};

/// Shared application state accessible by all handlers
pub struct AppState {
    /// Registry of connected WebSocket clients
    pub hub: Arc<SubscriptionHub>,
    /// Publish path to the broker
    pub publisher: Arc<dyn EventPublisher>,
}

impl AppState {
    pub fn new(hub: Arc<SubscriptionHub>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { hub, publisher }
    }
}

/// Main API structure
pub struct Api {
    /// API address
    addr: SocketAddr,
    /// Shared application state
    state: Arc<AppState>,
}

impl Api {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            state: Arc::new(state),
        }
    }

    /// Creates all routes for the API
    pub fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .route("/event", post(routes::publish_event))
            .route("/ws", get(ws::ws_upgrade))
            .layer(Extension(self.state.clone()))
            // WebSocket clients may connect from any origin
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serves until `cancel` fires, then drains in-flight requests.
    pub async fn serve(self, cancel: CancellationToken) -> std::io::Result<()> {
        let app = self.routes();

        let listener = TcpListener::bind(self.addr).await?;
        info!("API listening on {}", self.addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("API stopped");
        Ok(())
    }
}

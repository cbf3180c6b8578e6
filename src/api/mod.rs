//! HTTP server: health check and the viewer WebSocket stream
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Actor handles** in [`ApiState`] for the hub and the persistence sink
//! - **WebSocket** upgrades handed to [`crate::session::ViewerSession`]
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `WS /api/v1/stream` - Real-time metric streaming

pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use state::ApiState;
pub use types::{HealthResponse, HealthState};

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the router with all routes
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// Binds before returning, so a port that cannot be bound fails startup.
/// The server stops accepting connections once `shutdown` fires.
pub async fn spawn_api_server(
    bind_addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    info!("starting API server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    let app = router(state);
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!("API server error: {}", e);
        }
    });

    Ok((addr, task))
}

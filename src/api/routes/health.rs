//! Health check endpoint

use axum::Json;
use axum::extract::State;
use tracing::warn;

use crate::api::state::ApiState;
use crate::api::types::{HealthResponse, HealthState};

/// GET /api/v1/health
///
/// Reports the viewer count and the persistence sink's health. Answers 200
/// even when degraded.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let mut status = HealthState::Ok;

    let viewers = match state.hub.viewer_count().await {
        Ok(viewers) => viewers,
        Err(e) => {
            warn!("hub unavailable for health check: {:#}", e);
            status = HealthState::Degraded;
            0
        }
    };

    let storage = match state.sink.health_check().await {
        Ok(health) => {
            if !health.healthy {
                status = HealthState::Degraded;
            }
            health.message
        }
        Err(e) => {
            status = HealthState::Degraded;
            e.to_string()
        }
    };

    Json(HealthResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        viewers,
        storage,
    })
}

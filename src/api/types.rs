//! API response types

use serde::{Deserialize, Serialize};

/// Overall service health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Hub running and persistence sink healthy
    Ok,
    /// Streaming or persistence is impaired
    Degraded,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Ok => write!(f, "ok"),
            HealthState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub timestamp: String,

    /// Connected viewers, 0 when the hub is gone
    pub viewers: usize,

    /// Message reported by the persistence sink
    pub storage: String,
}

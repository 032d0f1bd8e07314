use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::phase::VisiblePhase;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Phase of the running game.
    pub phase: VisiblePhase,
    /// Whether the playlist directory is reachable.
    pub playlists_reachable: bool,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(phase: VisiblePhase) -> Self {
        Self {
            status: "ok".to_string(),
            phase,
            playlists_reachable: true,
        }
    }

    /// Create a health response indicating the playlist storage is unreachable.
    pub fn degraded(phase: VisiblePhase) -> Self {
        Self {
            status: "degraded".to_string(),
            phase,
            playlists_reachable: false,
        }
    }
}

use tracing::warn;

use crate::{
    dto::{health::HealthResponse, phase::VisiblePhase},
    state::SharedState,
};

/// Report the game phase and whether the playlist storage can still be read.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let phase = VisiblePhase::from(&state.game().read().await.phase());

    match state.playlists().health_check().await {
        Ok(()) => HealthResponse::ok(phase),
        Err(err) => {
            warn!(error = %err, "playlist storage health check failed");
            HealthResponse::degraded(phase)
        }
    }
}

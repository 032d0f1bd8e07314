//! Read-only projections of the running game for spectators.

use crate::{dto::snapshot::GameSnapshot, services::game_service, state::SharedState};

/// Return the redacted snapshot shown to every client.
pub async fn get_state(state: &SharedState) -> GameSnapshot {
    game_service::snapshot(state).await
}

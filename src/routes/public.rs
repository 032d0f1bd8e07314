use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::snapshot::GameSnapshot, services::public_service, state::SharedState};

/// Public read-only endpoints that expose the current game state.
pub fn router() -> Router<SharedState> {
    Router::new().route("/public/state", get(get_state))
}

#[utoipa::path(
    get,
    path = "/public/state",
    tag = "public",
    responses((status = 200, description = "Current game snapshot", body = GameSnapshot))
)]
/// Return the snapshot every client sees, with hidden fields redacted.
pub async fn get_state(State(state): State<SharedState>) -> Json<GameSnapshot> {
    Json(public_service::get_state(&state).await)
}

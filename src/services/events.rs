use axum::extract::ws::Message;
use tracing::{debug, warn};

use crate::{
    dto::{snapshot::GameSnapshot, sse::ServerEvent, ws::ServerMessage},
    state::{SharedState, session::ConnectionId},
};

/// SSE event name carrying a game snapshot.
pub const EVENT_STATE: &str = "state";

/// Push a settled snapshot to every WebSocket client and SSE subscriber.
pub fn broadcast_snapshot(state: &SharedState, snapshot: &GameSnapshot) {
    if let Some(event) = state_event(snapshot) {
        state.public_sse().broadcast(event);
    }

    let payload = match serde_json::to_string(&ServerMessage::State(snapshot.clone())) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize state message");
            return;
        }
    };

    let closed: Vec<ConnectionId> = state
        .connections()
        .iter()
        .filter(|connection| {
            connection
                .tx
                .send(Message::Text(payload.clone().into()))
                .is_err()
        })
        .map(|connection| connection.id)
        .collect();

    for id in closed {
        debug!(connection = %id, "dropping closed connection from broadcast list");
        state.connections().remove(&id);
    }
}

/// Send a message to a single WebSocket client. Returns `false` when it is gone.
pub fn send_to_connection(state: &SharedState, id: ConnectionId, message: &ServerMessage) -> bool {
    let Some(tx) = state.connections().get(&id).map(|connection| connection.tx.clone()) else {
        return false;
    };
    match serde_json::to_string(message) {
        Ok(payload) => tx.send(Message::Text(payload.into())).is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{message:?}`");
            true
        }
    }
}

/// Build the SSE event for a snapshot.
pub fn state_event(snapshot: &GameSnapshot) -> Option<ServerEvent> {
    ServerEvent::json(Some(EVENT_STATE.to_string()), snapshot)
        .inspect_err(|err| warn!(error = %err, "failed to serialize state event"))
        .ok()
}

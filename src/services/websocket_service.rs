use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        snapshot::GameSnapshot,
        ws::{ClientMessage, ServerMessage},
    },
    error::ServiceError,
    services::{events, game_service},
    state::{ClientConnection, SharedState, session::ConnectionId},
};

/// Handle the full lifecycle of one player or admin WebSocket connection.
///
/// The connection is registered for broadcasts immediately and receives the
/// current snapshot, so spectators can watch without joining. A `join`
/// message binds it to a session; every other message is an action applied
/// on behalf of that session.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id: ConnectionId = Uuid::new_v4();
    register(&state, connection_id, &outbound_tx).await;
    info!(connection = %connection_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection = %connection_id, payload = %text, "received client message");
                let reply = match ClientMessage::from_json_str(&text) {
                    Ok(message) => dispatch(&state, connection_id, message).await,
                    Err(err) => {
                        warn!(connection = %connection_id, error = %err, "rejected client message");
                        ServerMessage::error(err.kind(), err.to_string())
                    }
                };
                if !events::send_to_connection(&state, connection_id, &reply) {
                    info!(connection = %connection_id, "writer closed while replying, terminating");
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                let reply = ServerMessage::error("invalid_action", "binary frames are not supported");
                let _ = events::send_to_connection(&state, connection_id, &reply);
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.connections().remove(&connection_id);
    game_service::disconnect(&state, connection_id).await;
    info!(connection = %connection_id, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Add the connection to the broadcast list and queue the current snapshot.
///
/// Both happen under the game's read lock, so the first state message is
/// never older than one that follows it.
async fn register(
    state: &SharedState,
    id: ConnectionId,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    let game = state.game().read().await;
    state.connections().insert(
        id,
        ClientConnection {
            id,
            tx: outbound_tx.clone(),
        },
    );
    let snapshot = GameSnapshot::capture(&game, state.now_ms());
    events::send_to_connection(state, id, &ServerMessage::State(snapshot));
}

/// Apply one parsed message and build the reply for the sender.
async fn dispatch(
    state: &SharedState,
    connection: ConnectionId,
    message: ClientMessage,
) -> ServerMessage {
    let action = message.action();
    let result = match message {
        ClientMessage::Join(request) => {
            return match game_service::join(state, connection, request).await {
                Ok(joined) => {
                    info!(
                        connection = %connection,
                        name = %joined.name,
                        is_admin = joined.is_admin,
                        reconnected = joined.reconnected,
                        "player joined"
                    );
                    ServerMessage::Joined {
                        name: joined.name,
                        is_admin: joined.is_admin,
                        game_id: joined.game_id,
                        reconnected: joined.reconnected,
                    }
                }
                Err(err) => error_reply(connection, action, err),
            };
        }
        other => game_service::handle_action(state, connection, other).await,
    };

    match result {
        Ok(()) => ServerMessage::ack(action),
        Err(err) => error_reply(connection, action, err),
    }
}

fn error_reply(connection: ConnectionId, action: &str, err: ServiceError) -> ServerMessage {
    match &err {
        ServiceError::Game(_) => {
            debug!(connection = %connection, action, error = %err, "action rejected");
        }
        _ => warn!(connection = %connection, action, error = %err, "action failed"),
    }
    ServerMessage::error(err.kind(), err.to_string())
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::{snapshot::GameSnapshot, sse::ServerEvent},
    services::events,
    state::SharedState,
};

/// Subscribe to the public SSE stream, returning the current snapshot as the
/// first event.
///
/// The subscription is taken while the game is read-locked. Snapshots are
/// broadcast under the write lock, so the stream neither misses nor repeats an
/// update between the initial event and the live feed.
pub async fn subscribe_public(
    state: &SharedState,
) -> (Option<ServerEvent>, broadcast::Receiver<ServerEvent>) {
    let game = state.game().read().await;
    let receiver = state.public_sse().subscribe();
    let initial = events::state_event(&GameSnapshot::capture(&game, state.now_ms()));
    (initial, receiver)
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects.
pub fn to_sse_stream(
    initial: Option<ServerEvent>,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(payload) = initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Snapshots are self-contained; the next one catches the client up.
                            debug!(skipped, "public SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!("public SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        services::{events::EVENT_STATE, playback::LogPlayback},
        state::{AppState, playlist::SongPool},
    };

    #[tokio::test]
    async fn subscription_starts_with_the_current_snapshot() {
        let state = AppState::new(
            AppConfig::default(),
            SongPool::from_songs(Vec::new()),
            Arc::new(LogPlayback),
        );

        let (initial, mut receiver) = subscribe_public(&state).await;
        let initial = initial.unwrap();
        assert_eq!(initial.event.as_deref(), Some(EVENT_STATE));
        let json: serde_json::Value = serde_json::from_str(&initial.data).unwrap();
        assert_eq!(json["phase"], "LOBBY");
        assert_eq!(state.public_sse().subscriber_count(), 1);

        let snapshot = GameSnapshot::capture(&*state.game().read().await, state.now_ms());
        events::broadcast_snapshot(&state, &snapshot);
        let next = receiver.recv().await.unwrap();
        assert_eq!(next.event.as_deref(), Some(EVENT_STATE));
    }
}

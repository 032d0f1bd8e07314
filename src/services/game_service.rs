//! Applies client actions to the game and runs the resulting playback commands.
//!
//! Each action is applied under the game's write lock and the settled snapshot
//! is broadcast before the lock is released, so clients observe changes in the
//! order they were committed. Playback commands run afterwards, outside the
//! lock; their outcome is fed back as a separate mutation.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    dao::playlist_store::PlaylistStore,
    dto::{
        snapshot::GameSnapshot,
        ws::{ClientMessage, JoinRequest, SubmitRequest, VolumeRequest},
    },
    error::{GameError, ServiceError},
    services::{events, playback::PlaybackError},
    state::{
        SharedState,
        clock::Millis,
        game::{Game, Joined, Outcome, PlaybackCommand},
        playlist::{LoadedPool, SongPool},
        session::ConnectionId,
    },
};

/// Read every configured playlist source and build the song pool.
pub async fn load_song_pool(store: &dyn PlaylistStore) -> Result<LoadedPool, ServiceError> {
    let sources = store.list_sources().await?;
    let loaded = SongPool::load(sources)?;
    info!(
        songs = loaded.pool.len(),
        rejected = loaded.issues.len(),
        "song pool ready"
    );
    Ok(loaded)
}

/// Bind `connection` to a new or resumed player session.
pub async fn join(
    state: &SharedState,
    connection: ConnectionId,
    request: JoinRequest,
) -> Result<Joined, ServiceError> {
    let mut game = state.game().write().await;
    let now = state.now_ms();
    let joined = game.join(connection, &request.name, request.as_admin, now)?;
    publish(state, &game, now);
    Ok(joined)
}

/// Apply a non-join action sent by `connection`.
pub async fn handle_action(
    state: &SharedState,
    connection: ConnectionId,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    match message {
        ClientMessage::Submit(SubmitRequest { year, bet }) => {
            apply(state, |game, now| game.submit(connection, year, bet, now)).await?;
            Ok(())
        }
        ClientMessage::StartGame => {
            run_admin_action(state, |game, now| game.start_game(connection, now)).await
        }
        ClientMessage::StopSong => {
            run_admin_action(state, |game, _| game.stop_song(connection)).await
        }
        ClientMessage::NextRound => {
            run_admin_action(state, |game, now| game.next_round(connection, now)).await
        }
        ClientMessage::SetVolume(VolumeRequest { level }) => {
            run_admin_action(state, |game, _| game.set_volume(connection, level)).await
        }
        ClientMessage::EndGame => {
            run_admin_action(state, |game, now| game.end_game(connection, now)).await
        }
        ClientMessage::ResetGame => {
            run_admin_action(state, |game, now| game.reset(connection, now)).await
        }
        ClientMessage::Join(_) => Err(GameError::InvalidAction(
            "join is handled by the connection handshake".into(),
        )
        .into()),
        ClientMessage::Unknown => {
            Err(GameError::InvalidAction("unknown message type".into()).into())
        }
    }
}

/// Mark the session bound to `connection` as disconnected.
pub async fn disconnect(state: &SharedState, connection: ConnectionId) {
    let result = apply(state, |game, now| Ok(game.disconnect(connection, now))).await;
    if let Err(err) = result {
        warn!(%connection, error = %err, "disconnect handling failed");
    }
}

/// Advance timers: round expiry, early reveal and reconnection windows.
pub async fn tick(state: &SharedState) {
    if let Err(err) = apply(state, |game, now| Ok(game.tick(now))).await {
        warn!(error = %err, "tick failed");
    }
}

/// Current snapshot, as broadcast to clients.
pub async fn snapshot(state: &SharedState) -> GameSnapshot {
    let game = state.game().read().await;
    GameSnapshot::capture(&game, state.now_ms())
}

async fn apply<F>(state: &SharedState, action: F) -> Result<Vec<PlaybackCommand>, GameError>
where
    F: FnOnce(&mut Game, Millis) -> Result<Outcome, GameError>,
{
    let mut game = state.game().write().await;
    let now = state.now_ms();
    let outcome = action(&mut game, now)?;
    if outcome.changed {
        publish(state, &game, now);
    }
    Ok(outcome.commands)
}

async fn run_admin_action<F>(state: &SharedState, action: F) -> Result<(), ServiceError>
where
    F: FnOnce(&mut Game, Millis) -> Result<Outcome, GameError>,
{
    let _gate = state.transition_gate().lock().await;
    let commands = apply(state, action).await?;
    execute_playback(state, commands).await
}

/// Run playback commands in order. A song that cannot be started (error or
/// timeout) is replaced by the game with another one, which is played in turn.
async fn execute_playback(
    state: &SharedState,
    commands: Vec<PlaybackCommand>,
) -> Result<(), ServiceError> {
    let mut queue = VecDeque::from(commands);
    let mut first_error = None;

    while let Some(command) = queue.pop_front() {
        match command {
            PlaybackCommand::Play { round, uri } => {
                match with_timeout(state, state.playback().play(&uri)).await {
                    Ok(metadata) => {
                        apply(state, |game, _| {
                            Ok(Outcome {
                                changed: game.playback_started(round, &uri, metadata),
                                commands: Vec::new(),
                            })
                        })
                        .await?;
                    }
                    Err(err) => {
                        warn!(round, %uri, error = %err, "song could not be started");
                        let replacement =
                            apply(state, |game, now| Ok(game.playback_failed(round, &uri, now)))
                                .await?;
                        queue.extend(replacement);
                    }
                }
            }
            PlaybackCommand::Stop => {
                if let Err(err) = with_timeout(state, state.playback().stop()).await {
                    warn!(error = %err, "stop command failed");
                    first_error.get_or_insert(err);
                }
            }
            PlaybackCommand::SetVolume(level) => {
                if let Err(err) = with_timeout(state, state.playback().set_volume(level)).await {
                    warn!(level, error = %err, "volume command failed");
                    first_error.get_or_insert(err);
                }
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

async fn with_timeout<T>(
    state: &SharedState,
    command: BoxFuture<'static, Result<T, PlaybackError>>,
) -> Result<T, ServiceError> {
    match timeout(state.playback_timeout(), command).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => Err(ServiceError::Timeout),
    }
}

fn publish(state: &SharedState, game: &Game, now: Millis) {
    events::broadcast_snapshot(state, &GameSnapshot::capture(game, now));
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::extract::ws::Message;
    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::Value;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dto::phase::VisiblePhase,
        services::playback::PlaybackAdapter,
        state::{
            AppState, ClientConnection,
            clock::{Clock, ManualClock},
            game::SongMetadata,
            playlist::Song,
            state_machine::{GamePhase, PausedFrom},
        },
    };

    const START: Millis = 5_000_000;

    #[derive(Default)]
    struct ScriptedPlayback {
        calls: Mutex<Vec<String>>,
        failing_plays: AtomicUsize,
        hang: bool,
        broken_volume: bool,
    }

    impl ScriptedPlayback {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl PlaybackAdapter for ScriptedPlayback {
        fn play(&self, uri: &str) -> BoxFuture<'static, Result<SongMetadata, PlaybackError>> {
            self.record(format!("play:{uri}"));
            if self.hang {
                return Box::pin(futures::future::pending());
            }
            let failed = self
                .failing_plays
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            let uri = uri.to_string();
            Box::pin(async move {
                if failed {
                    Err(PlaybackError::Rejected {
                        uri,
                        reason: "not found".into(),
                    })
                } else {
                    Ok(SongMetadata {
                        artist: Some("Artist".into()),
                        title: Some(format!("Title of {uri}")),
                        album_art: None,
                    })
                }
            })
        }

        fn stop(&self) -> BoxFuture<'static, Result<(), PlaybackError>> {
            self.record("stop".into());
            Box::pin(async { Ok(()) })
        }

        fn set_volume(&self, level: f32) -> BoxFuture<'static, Result<(), PlaybackError>> {
            self.record(format!("volume:{level}"));
            let broken = self.broken_volume;
            Box::pin(async move {
                if broken {
                    Err(PlaybackError::Unavailable("speaker offline".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct Harness {
        state: SharedState,
        clock: Arc<ManualClock>,
        playback: Arc<ScriptedPlayback>,
    }

    fn harness(songs: usize, playback: ScriptedPlayback) -> Harness {
        let config = AppConfig {
            early_reveal: false,
            playback_timeout_secs: 1,
            ..AppConfig::default()
        };
        let pool = SongPool::from_songs(
            (0..songs).map(|index| Song::new(1980 + index as i32, format!("media:{index}"), None)),
        );
        let clock = Arc::new(ManualClock::new(START));
        let playback = Arc::new(playback);
        let game = Game::with_rng(config.game_settings(), pool, START, StdRng::seed_from_u64(11));
        let state = AppState::from_game(
            config,
            game,
            playback.clone(),
            clock.clone() as Arc<dyn Clock>,
        );
        Harness {
            state,
            clock,
            playback,
        }
    }

    fn connect(state: &SharedState) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .connections()
            .insert(id, ClientConnection { id, tx });
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            messages.push(serde_json::from_str(text.as_str()).unwrap());
        }
        messages
    }

    async fn join_as(state: &SharedState, id: ConnectionId, name: &str, as_admin: bool) {
        join(
            state,
            id,
            JoinRequest {
                name: name.into(),
                as_admin,
            },
        )
        .await
        .unwrap();
    }

    async fn phase(state: &SharedState) -> GamePhase {
        state.game().read().await.phase()
    }

    #[tokio::test]
    async fn start_plays_a_song_and_publishes_metadata() {
        let Harness {
            state, playback, ..
        } = harness(2, ScriptedPlayback::default());
        let (admin, mut admin_rx) = connect(&state);
        let (player, _player_rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;
        join_as(&state, player, "Tom", false).await;
        drain(&mut admin_rx);

        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();

        assert_eq!(phase(&state).await, GamePhase::Playing);
        assert_eq!(playback.calls().len(), 1);
        assert!(playback.calls()[0].starts_with("play:media:"));

        let messages = drain(&mut admin_rx);
        assert_eq!(messages.len(), 2, "round start then metadata");
        assert!(messages.iter().all(|message| message["type"] == "state"));
        assert_eq!(messages[0]["phase"], "PLAYING");
        assert!(messages[0]["song"].get("title").is_none());
        assert_eq!(messages[1]["song"]["artist"], "Artist");
        assert!(messages[1]["song"].get("year").is_none());
    }

    #[tokio::test]
    async fn failed_song_is_replaced_within_the_same_round() {
        let Harness {
            state, playback, ..
        } = harness(
            3,
            ScriptedPlayback {
                failing_plays: AtomicUsize::new(1),
                ..ScriptedPlayback::default()
            },
        );
        let (admin, _rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;

        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();

        let calls = playback.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1]);
        let game = state.game().read().await;
        assert_eq!(game.phase(), GamePhase::Playing);
        assert_eq!(game.round(), 1);
        assert_eq!(game.total_rounds_hint(), 2);
        assert!(game.current().unwrap().metadata.is_some());
    }

    #[tokio::test]
    async fn exhausting_the_pool_through_failures_ends_the_game() {
        let Harness {
            state, playback, ..
        } = harness(
            2,
            ScriptedPlayback {
                failing_plays: AtomicUsize::new(2),
                ..ScriptedPlayback::default()
            },
        );
        let (admin, _rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;

        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();

        assert_eq!(playback.calls().len(), 2);
        assert_eq!(phase(&state).await, GamePhase::End);
    }

    #[tokio::test]
    async fn hanging_playback_times_out_into_a_skip() {
        let Harness {
            state, playback, ..
        } = harness(
            1,
            ScriptedPlayback {
                hang: true,
                ..ScriptedPlayback::default()
            },
        );
        let (admin, _rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;

        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();

        assert_eq!(playback.calls().len(), 1);
        assert_eq!(phase(&state).await, GamePhase::End);
    }

    #[tokio::test]
    async fn rejected_actions_change_nothing() {
        let Harness {
            state, playback, ..
        } = harness(2, ScriptedPlayback::default());
        let (admin, _admin_rx) = connect(&state);
        let (player, mut player_rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;
        join_as(&state, player, "Tom", false).await;
        drain(&mut player_rx);

        let err = handle_action(&state, player, ClientMessage::StartGame)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_admin");
        let err = handle_action(
            &state,
            player,
            ClientMessage::Submit(SubmitRequest {
                year: 1980,
                bet: false,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "game_not_started");

        assert!(playback.calls().is_empty());
        assert!(drain(&mut player_rx).is_empty());
        assert_eq!(phase(&state).await, GamePhase::Lobby);
    }

    #[tokio::test]
    async fn round_expires_on_tick_and_scores_are_broadcast() {
        let Harness { state, clock, .. } = harness(2, ScriptedPlayback::default());
        let (admin, _admin_rx) = connect(&state);
        let (player, mut player_rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;
        join_as(&state, player, "Tom", false).await;
        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();

        let year = state.game().read().await.current().unwrap().song.year;
        handle_action(
            &state,
            player,
            ClientMessage::Submit(SubmitRequest { year, bet: false }),
        )
        .await
        .unwrap();
        drain(&mut player_rx);

        clock.advance(30_000);
        tick(&state).await;
        assert!(drain(&mut player_rx).is_empty(), "deadline itself is inclusive");

        clock.advance(1);
        tick(&state).await;
        let messages = drain(&mut player_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["phase"], "REVEAL");
        assert_eq!(messages[0]["song"]["year"], year);
        assert_eq!(messages[0]["players"][1]["score"], 15);
    }

    #[tokio::test]
    async fn admin_disconnect_pauses_and_rejoin_resumes() {
        let Harness { state, clock, .. } = harness(2, ScriptedPlayback::default());
        let (admin, _admin_rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;
        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();

        clock.advance(10_000);
        state.connections().remove(&admin);
        disconnect(&state, admin).await;
        let paused = snapshot(&state).await;
        assert_eq!(paused.phase, VisiblePhase::Paused);
        assert_eq!(paused.remaining_ms, Some(20_000));

        clock.advance(40_000);
        tick(&state).await;
        assert_eq!(phase(&state).await, GamePhase::Paused(PausedFrom::Playing));

        let (again, _rx) = connect(&state);
        join_as(&state, again, "Sarah", false).await;
        let resumed = snapshot(&state).await;
        assert_eq!(resumed.phase, VisiblePhase::Playing);
        assert_eq!(resumed.deadline, Some(START + 50_000 + 20_000));
    }

    #[tokio::test]
    async fn device_failures_are_reported_to_the_admin() {
        let Harness {
            state, playback, ..
        } = harness(
            1,
            ScriptedPlayback {
                broken_volume: true,
                ..ScriptedPlayback::default()
            },
        );
        let (admin, _rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;

        let err = handle_action(
            &state,
            admin,
            ClientMessage::SetVolume(VolumeRequest { level: 0.3 }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "playback_failed");
        assert_eq!(playback.calls(), vec!["volume:0.3".to_string()]);
        assert_eq!(state.game().read().await.volume(), Some(0.3));
    }

    #[tokio::test]
    async fn end_and_reset_start_a_fresh_lobby() {
        let Harness {
            state, playback, ..
        } = harness(2, ScriptedPlayback::default());
        let (admin, _rx) = connect(&state);
        join_as(&state, admin, "Sarah", true).await;
        let first_id = snapshot(&state).await.game_id;

        handle_action(&state, admin, ClientMessage::StartGame)
            .await
            .unwrap();
        handle_action(&state, admin, ClientMessage::EndGame)
            .await
            .unwrap();
        assert_eq!(playback.calls().last().map(String::as_str), Some("stop"));

        handle_action(&state, admin, ClientMessage::ResetGame)
            .await
            .unwrap();
        let fresh = snapshot(&state).await;
        assert_eq!(fresh.phase, VisiblePhase::Lobby);
        assert_ne!(fresh.game_id, first_id);
        assert!(fresh.players.is_empty());
        assert_eq!(fresh.total_rounds_hint, 2);
    }
}

pub mod clock;
pub mod game;
mod hub;
pub mod playlist;
pub mod scoring;
pub mod session;
pub mod state_machine;

use std::{sync::Arc, time::Duration};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::{
    config::AppConfig,
    dao::playlist_store::{FsPlaylistStore, PlaylistStore},
    services::playback::PlaybackAdapter,
    state::{
        clock::{Clock, Millis, SystemClock},
        game::Game,
        playlist::SongPool,
        session::ConnectionId,
    },
};

pub use self::hub::SseHub;

/// Shared handle passed to every route and service.
pub type SharedState = Arc<AppState>;

const SSE_CAPACITY: usize = 64;

#[derive(Clone)]
/// Handle used to push messages to a connected WebSocket client.
pub struct ClientConnection {
    /// Transport handle of the connection.
    pub id: ConnectionId,
    /// Writer channel drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: the single game plus its transport fan-out.
///
/// Every mutation of the game goes through the write half of `game`, so
/// concurrent actions are applied one at a time and observers only ever read
/// settled state. Admin actions additionally hold `transition_gate` while
/// their playback commands run.
pub struct AppState {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    playback: Arc<dyn PlaybackAdapter>,
    playlists: Arc<dyn PlaylistStore>,
    game: RwLock<Game>,
    connections: DashMap<ConnectionId, ClientConnection>,
    public_sse: SseHub,
    transition_gate: Mutex<()>,
    playback_timeout: Duration,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, pool: SongPool, playback: Arc<dyn PlaybackAdapter>) -> SharedState {
        Self::with_clock(config, pool, playback, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(
        config: AppConfig,
        pool: SongPool,
        playback: Arc<dyn PlaybackAdapter>,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let game = Game::new(config.game_settings(), pool, clock.now_ms());
        Self::from_game(config, game, playback, clock)
    }

    /// Wrap an already constructed game.
    pub fn from_game(
        config: AppConfig,
        game: Game,
        playback: Arc<dyn PlaybackAdapter>,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let playback_timeout = config.playback_timeout();
        let playlists = Arc::new(FsPlaylistStore::new(
            config.playlists_dir.clone(),
            config.playlists.clone(),
        ));
        Arc::new(Self {
            config,
            clock,
            playback,
            playlists,
            game: RwLock::new(game),
            connections: DashMap::new(),
            public_sse: SseHub::new(SSE_CAPACITY),
            transition_gate: Mutex::new(()),
            playback_timeout,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current time from the injected clock.
    pub fn now_ms(&self) -> Millis {
        self.clock.now_ms()
    }

    /// Playback device.
    pub fn playback(&self) -> &Arc<dyn PlaybackAdapter> {
        &self.playback
    }

    /// Playlist storage, probed by the health check.
    pub fn playlists(&self) -> &Arc<dyn PlaylistStore> {
        &self.playlists
    }

    /// The single active game.
    pub fn game(&self) -> &RwLock<Game> {
        &self.game
    }

    /// Registry of open WebSocket connections.
    pub fn connections(&self) -> &DashMap<ConnectionId, ClientConnection> {
        &self.connections
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        &self.public_sse
    }

    /// Serializes admin actions together with their playback side effects.
    pub fn transition_gate(&self) -> &Mutex<()> {
        &self.transition_gate
    }

    /// Time allowed for a single playback command.
    pub fn playback_timeout(&self) -> Duration {
        self.playback_timeout
    }
}

//! The game aggregate: phases, the round timer, sessions, the song pool and
//! scoring, mutated only through the methods below.
//!
//! Every method receives the current time from the caller, so the aggregate
//! never sleeps or reads a clock. Side effects on the playback device are
//! returned as [`PlaybackCommand`]s for the service layer to execute once the
//! state lock has been released.

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::GameError,
    state::{
        clock::Millis,
        playlist::{Song, SongPool},
        scoring::{ScoreInput, ScoringRules, time_ratio},
        session::{ConnectionId, PlayerSession, RoundEntry, SessionStore, normalize_name},
        state_machine::{FinishReason, GameEvent, GamePhase, GameStateMachine, PausedFrom},
    },
};

/// Tunables of a game, resolved from the application configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameSettings {
    /// Length of the submission window.
    pub round_duration_ms: Millis,
    /// How long a disconnected session keeps its name and progress.
    pub reconnect_grace_ms: Millis,
    /// Capacity of the session store.
    pub max_players: usize,
    /// Reveal as soon as every connected player has submitted.
    pub early_reveal: bool,
    /// Selected scoring rule set.
    pub scoring: ScoringRules,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            round_duration_ms: 30_000,
            reconnect_grace_ms: 60_000,
            max_players: 20,
            early_reveal: true,
            scoring: ScoringRules::default(),
        }
    }
}

/// Metadata reported by the playback device once a song is playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongMetadata {
    /// Performing artist.
    pub artist: Option<String>,
    /// Track title.
    pub title: Option<String>,
    /// Cover art URL.
    pub album_art: Option<String>,
}

/// Song selected for the active or just-revealed round.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentRound {
    /// The selected song.
    pub song: Song,
    /// When the submission window opened (shifted forward by pauses).
    pub started_at: Millis,
    /// When the submission window closes.
    pub deadline: Millis,
    /// Live metadata, once the playback device acknowledged the song.
    pub metadata: Option<SongMetadata>,
}

/// Command for the playback device.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    /// Start playing `uri` for `round`.
    Play {
        /// Round the song belongs to, echoed back with the acknowledgement.
        round: u32,
        /// Playback reference.
        uri: String,
    },
    /// Stop audio.
    Stop,
    /// Change the output volume.
    SetVolume(f32),
}

/// What an accepted mutation requires from the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Whether connected clients must receive a new snapshot.
    pub changed: bool,
    /// Playback commands to run outside the state lock.
    pub commands: Vec<PlaybackCommand>,
}

impl Outcome {
    fn changed() -> Self {
        Self {
            changed: true,
            commands: Vec::new(),
        }
    }

    fn playback(commands: Vec<PlaybackCommand>) -> Self {
        Self {
            changed: false,
            commands,
        }
    }
}

/// Result of an accepted join.
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    /// Name the session was registered under.
    pub name: String,
    /// Whether the session holds the admin seat.
    pub is_admin: bool,
    /// Whether an existing session was resumed.
    pub reconnected: bool,
    /// Identifier of the game joined.
    pub game_id: Uuid,
}

/// The single active game.
#[derive(Debug, Clone)]
pub struct Game {
    id: Uuid,
    created_at: Millis,
    machine: GameStateMachine,
    round: u32,
    current: Option<CurrentRound>,
    paused_remaining: Option<Millis>,
    volume: Option<f32>,
    sessions: SessionStore,
    pool: SongPool,
    settings: GameSettings,
    rng: StdRng,
}

impl Game {
    /// Create a fresh lobby drawing songs from `pool`.
    pub fn new(settings: GameSettings, pool: SongPool, now: Millis) -> Self {
        Self::with_rng(settings, pool, now, StdRng::from_os_rng())
    }

    /// Create a fresh lobby with an explicit random source.
    pub fn with_rng(settings: GameSettings, pool: SongPool, now: Millis, rng: StdRng) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            machine: GameStateMachine::new(),
            round: 0,
            current: None,
            paused_remaining: None,
            volume: None,
            sessions: SessionStore::new(settings.max_players, settings.reconnect_grace_ms),
            pool,
            settings,
            rng,
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    /// Identifier of the current game session.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the current game session was created.
    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.machine.phase()
    }

    /// Number of songs started so far.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Rounds played plus songs still available.
    pub fn total_rounds_hint(&self) -> u32 {
        self.round
            .saturating_add(u32::try_from(self.pool.remaining_count()).unwrap_or(u32::MAX))
    }

    /// Song of the active or just-revealed round.
    pub fn current(&self) -> Option<&CurrentRound> {
        self.current.as_ref()
    }

    /// Submission deadline, only while a round is accepting guesses.
    pub fn deadline(&self) -> Option<Millis> {
        match self.machine.phase() {
            GamePhase::Playing => self.current.as_ref().map(|round| round.deadline),
            _ => None,
        }
    }

    /// Time left in the round when the game was paused.
    pub fn paused_remaining(&self) -> Option<Millis> {
        self.paused_remaining
    }

    /// Last volume requested by the admin.
    pub fn volume(&self) -> Option<f32> {
        self.volume
    }

    /// Sessions in join order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.list()
    }

    /// Session bound to a transport handle.
    pub fn session_for(&self, connection: ConnectionId) -> Option<&PlayerSession> {
        self.sessions.find_by_connection(connection)
    }

    /// Settings the game was created with.
    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Player actions
    // -----------------------------------------------------------------------

    /// Join the game, or resume a disconnected session under the same name.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        name: &str,
        as_admin: bool,
        now: Millis,
    ) -> Result<Joined, GameError> {
        if self.sessions.find_by_connection(connection).is_some() {
            return Err(GameError::InvalidAction(
                "this connection already joined the game".into(),
            ));
        }

        let name = normalize_name(name)?;
        self.sessions.purge_expired(now);
        if self.sessions.is_reserved(&name, now) {
            return self.rejoin(connection, &name, as_admin, now);
        }

        // In END only a vacant admin seat can still be filled.
        if self.machine.phase() == GamePhase::End && !as_admin {
            return Err(GameError::GameEnded);
        }
        if as_admin && self.sessions.admin().is_some() {
            return Err(GameError::AdminExists);
        }

        let name = self.sessions.add(&name, connection, now)?.name.clone();
        if as_admin {
            self.sessions.set_admin(&name)?;
            if self.machine.paused_from().is_some() {
                // The previous admin's grace period lapsed; the new admin takes over.
                self.resume(now)?;
            }
        }

        info!(player = %name, admin = as_admin, phase = ?self.machine.phase(), "player joined");
        Ok(Joined {
            name,
            is_admin: as_admin,
            reconnected: false,
            game_id: self.id,
        })
    }

    fn rejoin(
        &mut self,
        connection: ConnectionId,
        name: &str,
        as_admin: bool,
        now: Millis,
    ) -> Result<Joined, GameError> {
        let was_admin = self.sessions.get(name).is_some_and(|session| session.is_admin);
        let claims_seat = as_admin && !was_admin;
        if claims_seat && self.sessions.admin().is_some() {
            return Err(GameError::AdminExists);
        }

        if was_admin {
            self.sessions.reclaim_admin(name, connection, now)?;
        } else if !self.sessions.mark_reconnected(name, connection, now) {
            return Err(GameError::NameTaken(name.to_string()));
        }
        if claims_seat {
            self.sessions.set_admin(name)?;
            info!(player = %name, "vacant admin seat claimed on reconnect");
        }

        let is_admin = was_admin || claims_seat;
        if is_admin && self.machine.paused_from().is_some() {
            self.resume(now)?;
        }

        let session = self.sessions.get(name).ok_or(GameError::NotInGame)?;
        Ok(Joined {
            name: session.name.clone(),
            is_admin,
            reconnected: true,
            game_id: self.id,
        })
    }

    /// Record a guess for the current round.
    ///
    /// Checks run in a fixed order: identity, phase, duplicate, deadline.
    pub fn submit(
        &mut self,
        connection: ConnectionId,
        year: i32,
        bet: bool,
        now: Millis,
    ) -> Result<Outcome, GameError> {
        let name = self
            .sessions
            .find_by_connection(connection)
            .map(|session| session.name.clone())
            .ok_or(GameError::NotInGame)?;

        let phase = self.machine.phase();
        match phase {
            GamePhase::Lobby => return Err(GameError::GameNotStarted),
            GamePhase::End => return Err(GameError::GameEnded),
            GamePhase::Paused(_) => {
                return Err(GameError::InvalidAction("the game is paused".into()));
            }
            GamePhase::Playing | GamePhase::Reveal => {}
        }

        let (started_at, deadline) = self
            .current
            .as_ref()
            .map(|round| (round.started_at, round.deadline))
            .ok_or(GameError::GameNotStarted)?;

        let session = self.sessions.get_mut(&name).ok_or(GameError::NotInGame)?;
        if session.round.submitted {
            return Err(GameError::AlreadySubmitted);
        }
        if phase == GamePhase::Reveal || now > deadline {
            return Err(GameError::RoundExpired);
        }

        session.round.submitted = true;
        session.round.guessed_year = Some(year);
        session.round.submission_time = Some(now);
        session.round.elapsed_ms = Some(now.saturating_sub(started_at));
        session.round.bet_active = bet;
        debug!(player = %name, round = self.round, "guess recorded");

        self.maybe_early_reveal();
        Ok(Outcome::changed())
    }

    /// Handle a dropped transport. Losing the admin pauses the game.
    pub fn disconnect(&mut self, connection: ConnectionId, now: Millis) -> Outcome {
        let Some(session) = self.sessions.find_by_connection(connection) else {
            return Outcome::default();
        };
        let name = session.name.clone();
        let is_admin = session.is_admin;

        self.sessions.mark_disconnected(&name, now);
        if is_admin {
            self.pause(now);
        } else {
            self.maybe_early_reveal();
        }
        Outcome::changed()
    }

    // -----------------------------------------------------------------------
    // Admin actions
    // -----------------------------------------------------------------------

    /// Start the first round.
    pub fn start_game(&mut self, connection: ConnectionId, now: Millis) -> Result<Outcome, GameError> {
        self.require_admin(connection, "start the game")?;
        self.machine.can_apply(GameEvent::StartGame)?;
        if self.sessions.is_empty() {
            return Err(GameError::InvalidAction(
                "at least one player must join first".into(),
            ));
        }
        let song = self
            .pool
            .next_unplayed(&mut self.rng)
            .ok_or_else(|| GameError::InvalidAction("the song pool is empty".into()))?;

        self.machine.apply(GameEvent::StartGame)?;
        info!(game_id = %self.id, players = self.sessions.len(), "game started");
        Ok(self.begin_round(song, now))
    }

    /// Stop the audio of the live round. The timer keeps running.
    pub fn stop_song(&mut self, connection: ConnectionId) -> Result<Outcome, GameError> {
        self.require_admin(connection, "stop the song")?;
        match self.machine.phase() {
            GamePhase::Playing => Ok(Outcome::playback(vec![PlaybackCommand::Stop])),
            GamePhase::Lobby => Err(GameError::GameNotStarted),
            GamePhase::End => Err(GameError::GameEnded),
            _ => Err(GameError::InvalidAction("no song is playing".into())),
        }
    }

    /// Leave the reveal for a new song, or skip a live round without scoring it.
    pub fn next_round(&mut self, connection: ConnectionId, now: Millis) -> Result<Outcome, GameError> {
        self.require_admin(connection, "advance the round")?;
        self.expire_round(now);
        self.machine.can_apply(GameEvent::NextRound)?;

        if self.machine.phase() == GamePhase::Playing {
            info!(round = self.round, "live round skipped; guesses discarded");
            self.reset_round_entries();
        }

        match self.pool.next_unplayed(&mut self.rng) {
            Some(song) => {
                self.machine.apply(GameEvent::NextRound)?;
                Ok(self.begin_round(song, now))
            }
            None => {
                self.finish(FinishReason::PlaylistExhausted)?;
                Ok(Outcome {
                    changed: true,
                    commands: vec![PlaybackCommand::Stop],
                })
            }
        }
    }

    /// Change the playback volume (`0.0..=1.0`).
    pub fn set_volume(&mut self, connection: ConnectionId, level: f32) -> Result<Outcome, GameError> {
        self.require_admin(connection, "change the volume")?;
        if !level.is_finite() || !(0.0..=1.0).contains(&level) {
            return Err(GameError::InvalidAction(format!(
                "volume must be between 0.0 and 1.0 (got {level})"
            )));
        }
        self.volume = Some(level);
        Ok(Outcome::playback(vec![PlaybackCommand::SetVolume(level)]))
    }

    /// End the game. A live round is discarded without scoring.
    pub fn end_game(&mut self, connection: ConnectionId, now: Millis) -> Result<Outcome, GameError> {
        self.require_admin(connection, "end the game")?;
        self.expire_round(now);
        self.machine
            .can_apply(GameEvent::Finish(FinishReason::ManualStop))?;

        if self.machine.phase() == GamePhase::Playing {
            info!(round = self.round, "game ended mid-round; guesses discarded");
            self.reset_round_entries();
        }
        self.finish(FinishReason::ManualStop)?;
        Ok(Outcome {
            changed: true,
            commands: vec![PlaybackCommand::Stop],
        })
    }

    /// Recreate a fresh lobby after the game ended: new id, no players, every
    /// song available again.
    pub fn reset(&mut self, connection: ConnectionId, now: Millis) -> Result<Outcome, GameError> {
        self.require_admin(connection, "reset the game")?;
        self.machine.apply(GameEvent::Reset)?;

        self.id = Uuid::new_v4();
        self.created_at = now;
        self.round = 0;
        self.current = None;
        self.paused_remaining = None;
        self.sessions.clear();
        self.pool.reset_played();
        info!(game_id = %self.id, songs = self.pool.len(), "game reset to a fresh lobby");
        Ok(Outcome::changed())
    }

    // -----------------------------------------------------------------------
    // Time and playback feedback
    // -----------------------------------------------------------------------

    /// Advance timers: purge lapsed sessions and close an expired round.
    pub fn tick(&mut self, now: Millis) -> Outcome {
        let purged = self.sessions.purge_expired(now);
        if purged.iter().any(|session| session.is_admin) {
            warn!("admin did not come back in time; admin seat released");
        }

        let mut changed = !purged.is_empty();
        changed |= self.expire_round(now);
        changed |= self.maybe_early_reveal();

        Outcome {
            changed,
            commands: Vec::new(),
        }
    }

    /// Attach device metadata to the round `uri` was started for.
    ///
    /// Returns `false` for a stale acknowledgement.
    pub fn playback_started(&mut self, round: u32, uri: &str, metadata: SongMetadata) -> bool {
        if self.round != round {
            return false;
        }
        match self.current.as_mut() {
            Some(current) if current.song.uri == uri => {
                current.metadata = Some(metadata);
                true
            }
            _ => false,
        }
    }

    /// Replace a song the device could not play with another unplayed one.
    ///
    /// The failed song stays marked as played. Guesses made against it are
    /// discarded and the submission window restarts for the replacement.
    pub fn playback_failed(&mut self, round: u32, uri: &str, now: Millis) -> Outcome {
        let phase = self.machine.phase();
        let paused = phase == GamePhase::Paused(PausedFrom::Playing);
        let current_matches = self.round == round
            && self
                .current
                .as_ref()
                .is_some_and(|current| current.song.uri == uri);

        if !current_matches || !(phase == GamePhase::Playing || paused) {
            debug!(round, uri, "stale playback failure ignored");
            return Outcome::default();
        }

        self.reset_round_entries();
        match self.pool.next_unplayed(&mut self.rng) {
            Some(song) => {
                warn!(round, failed = uri, replacement = %song.uri, "playback failed; skipping song");
                let uri = self.install_song(song, now);
                if paused {
                    self.paused_remaining = Some(self.settings.round_duration_ms);
                }
                Outcome {
                    changed: true,
                    commands: vec![PlaybackCommand::Play { round, uri }],
                }
            }
            None if paused => {
                warn!(round, uri, "playback failed and no replacement song is left; game ends on resume");
                self.current = None;
                self.paused_remaining = None;
                Outcome::changed()
            }
            None => {
                warn!(round, uri, "playback failed on the last song; ending game");
                if let Err(err) = self.finish(FinishReason::PlaylistExhausted) {
                    warn!(error = %err, "could not finish the game");
                }
                Outcome::changed()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require_admin(&self, connection: ConnectionId, action: &'static str) -> Result<(), GameError> {
        let session = self
            .sessions
            .find_by_connection(connection)
            .ok_or(GameError::NotInGame)?;
        if session.is_admin {
            Ok(())
        } else {
            Err(GameError::NotAdmin(action))
        }
    }

    fn begin_round(&mut self, song: Song, now: Millis) -> Outcome {
        self.round += 1;
        self.reset_round_entries();
        let uri = self.install_song(song, now);
        info!(round = self.round, %uri, remaining = self.pool.remaining_count(), "round started");
        Outcome {
            changed: true,
            commands: vec![PlaybackCommand::Play {
                round: self.round,
                uri,
            }],
        }
    }

    fn install_song(&mut self, song: Song, now: Millis) -> String {
        self.pool.mark_played(&song.uri);
        let uri = song.uri.clone();
        self.current = Some(CurrentRound {
            song,
            started_at: now,
            deadline: now + self.settings.round_duration_ms,
            metadata: None,
        });
        uri
    }

    fn reset_round_entries(&mut self) {
        self.sessions
            .list_mut()
            .for_each(|session| session.round = RoundEntry::default());
    }

    fn finish(&mut self, reason: FinishReason) -> Result<(), GameError> {
        self.machine.apply(GameEvent::Finish(reason))?;
        self.current = None;
        self.paused_remaining = None;
        info!(?reason, rounds = self.round, "game finished");
        Ok(())
    }

    fn pause(&mut self, now: Millis) {
        self.expire_round(now);
        match self.machine.apply(GameEvent::Pause) {
            Ok(_) => {
                if self.machine.paused_from() == Some(PausedFrom::Playing) {
                    self.paused_remaining = self
                        .current
                        .as_ref()
                        .map(|round| round.deadline.saturating_sub(now));
                }
                info!(remaining_ms = ?self.paused_remaining, "admin disconnected; game paused");
            }
            Err(err) => debug!(error = %err, "admin left without pausing the game"),
        }
    }

    fn resume(&mut self, now: Millis) -> Result<(), GameError> {
        let restored = self.machine.apply(GameEvent::Resume)?;
        if restored == GamePhase::Playing && self.current.is_none() {
            // The last song failed while paused.
            info!("admin returned but no playable song is left");
            return self.finish(FinishReason::PlaylistExhausted);
        }
        if let Some(remaining) = self.paused_remaining.take() {
            if let Some(round) = self.current.as_mut() {
                round.deadline = now + remaining;
                round.started_at = round
                    .deadline
                    .saturating_sub(self.settings.round_duration_ms);
            }
        }
        info!(phase = ?restored, "admin returned; game resumed");
        Ok(())
    }

    fn expire_round(&mut self, now: Millis) -> bool {
        let expired = self.machine.phase() == GamePhase::Playing
            && self.current.as_ref().is_some_and(|round| now > round.deadline);
        if expired {
            debug!(round = self.round, "round deadline passed");
            self.reveal();
        }
        expired
    }

    fn maybe_early_reveal(&mut self) -> bool {
        if !self.settings.early_reveal || self.machine.phase() != GamePhase::Playing {
            return false;
        }
        let everyone_submitted = {
            let mut connected = self.sessions.list().filter(|session| session.connected).peekable();
            connected.peek().is_some() && connected.all(|session| session.round.submitted)
        };
        if everyone_submitted {
            debug!(round = self.round, "every connected player submitted");
            self.reveal();
        }
        everyone_submitted
    }

    fn reveal(&mut self) {
        if let Err(err) = self.machine.apply(GameEvent::Reveal) {
            warn!(error = %err, "cannot reveal");
            return;
        }
        let Some(actual) = self.current.as_ref().map(|round| round.song.year) else {
            return;
        };
        let duration = self.settings.round_duration_ms;
        let rules = self.settings.scoring;

        for session in self.sessions.list_mut() {
            let entry = &mut session.round;
            match (entry.submitted, entry.guessed_year) {
                (true, Some(guess)) => {
                    let outcome = rules.score(ScoreInput {
                        guess,
                        actual,
                        time_ratio: time_ratio(entry.elapsed_ms.unwrap_or(duration), duration),
                        prior_streak: session.streak,
                        bet: entry.bet_active,
                    });
                    entry.round_score = outcome.points;
                    entry.years_off = Some(outcome.years_off);
                    session.score = session.score.saturating_add(outcome.points);
                    session.streak = if outcome.close_enough {
                        session.streak + 1
                    } else {
                        0
                    };
                }
                _ => {
                    entry.round_score = 0;
                    entry.years_off = None;
                    session.streak = 0;
                }
            }
        }
        info!(round = self.round, year = actual, "round revealed");
    }
}

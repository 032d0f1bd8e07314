//! Broadcast snapshot of the game as every client sees it.
//!
//! The song's `year` and `fun_fact` are only filled in once the round has been
//! revealed; while guesses are open they are absent from the payload.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{format_millis, phase::VisiblePhase},
    state::{
        clock::Millis,
        game::{CurrentRound, Game},
        session::PlayerSession,
        state_machine::GamePhase,
    },
};

/// Full public view of the game.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct GameSnapshot {
    /// Identifier of the game session.
    pub game_id: Uuid,
    /// Current phase.
    pub phase: VisiblePhase,
    /// Phase restored when the admin returns (PAUSED only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<VisiblePhase>,
    /// Songs started so far.
    pub round: u32,
    /// Rounds played plus songs still available.
    pub total_rounds_hint: u32,
    /// Submission deadline in epoch milliseconds (PLAYING only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Millis>,
    /// Submission deadline as RFC 3339 (PLAYING only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<String>,
    /// Round time left when the game was paused mid-round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<Millis>,
    /// Server time the snapshot was taken at, for client clock skew.
    pub server_time: Millis,
    /// Players in join order.
    pub players: Vec<PlayerView>,
    /// Public fields of the current song.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<SongView>,
}

/// Public view of one player.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct PlayerView {
    /// Display name.
    pub name: String,
    /// Running total.
    pub score: u32,
    /// Consecutive close-enough rounds.
    pub streak: u32,
    /// Whether a guess is recorded for the current round.
    pub submitted: bool,
    /// Whether the transport is attached.
    pub connected: bool,
    /// Whether the player controls the game.
    pub is_admin: bool,
    /// Points earned in the revealed round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_score: Option<u32>,
    /// Year guessed in the revealed round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guessed_year: Option<i32>,
    /// Distance to the answer in the revealed round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years_off: Option<u32>,
    /// Whether a bet was attached in the revealed round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet: Option<bool>,
}

/// Public fields of the current song.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct SongView {
    /// Performing artist, once reported by the playback device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Track title, once reported by the playback device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Cover art URL, once reported by the playback device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
    /// The answer. Revealed phases only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Trivia. Revealed phases only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fun_fact: Option<String>,
}

impl GameSnapshot {
    /// Capture the settled state of `game`.
    pub fn capture(game: &Game, now: Millis) -> Self {
        let phase = game.phase();
        let revealed = is_revealed(phase);
        let deadline = game.deadline();

        Self {
            game_id: game.id(),
            phase: VisiblePhase::from(&phase),
            paused_from: match phase {
                GamePhase::Paused(from) => Some(from.into()),
                _ => None,
            },
            round: game.round(),
            total_rounds_hint: game.total_rounds_hint(),
            deadline,
            deadline_at: deadline.map(format_millis),
            remaining_ms: game.paused_remaining(),
            server_time: now,
            players: game
                .players()
                .map(|session| PlayerView::from_session(session, revealed))
                .collect(),
            song: game
                .current()
                .map(|current| SongView::from_round(current, revealed)),
        }
    }
}

impl PlayerView {
    fn from_session(session: &PlayerSession, revealed: bool) -> Self {
        let entry = &session.round;
        Self {
            name: session.name.clone(),
            score: session.score,
            streak: session.streak,
            submitted: entry.submitted,
            connected: session.connected,
            is_admin: session.is_admin,
            round_score: revealed.then_some(entry.round_score),
            guessed_year: entry.guessed_year.filter(|_| revealed),
            years_off: entry.years_off.filter(|_| revealed),
            bet: (revealed && entry.submitted).then_some(entry.bet_active),
        }
    }
}

impl SongView {
    fn from_round(round: &CurrentRound, revealed: bool) -> Self {
        let metadata = round.metadata.clone().unwrap_or_default();
        Self {
            artist: metadata.artist,
            title: metadata.title,
            album_art: metadata.album_art,
            year: revealed.then_some(round.song.year),
            fun_fact: round.song.fun_fact.clone().filter(|_| revealed),
        }
    }
}

fn is_revealed(phase: GamePhase) -> bool {
    matches!(phase, GamePhase::Reveal | GamePhase::End)
}

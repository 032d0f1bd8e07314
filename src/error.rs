use thiserror::Error;

use crate::{
    dao::storage::StorageError,
    services::playback::PlaybackError,
    state::{
        playlist::PlaylistError,
        state_machine::{GameEvent, GamePhase, InvalidTransition},
    },
};

/// Recoverable rejections of a player or admin action.
///
/// None of these change game state; they are reported to the requesting
/// connection only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Requested name is empty or too long.
    #[error("invalid name: {0}")]
    NameInvalid(String),
    /// Name collides (case-insensitively) with a present player.
    #[error("name `{0}` is already taken")]
    NameTaken(String),
    /// Capacity reached.
    #[error("game is full ({0} players)")]
    GameFull(usize),
    /// Action requires a running game.
    #[error("game has not started")]
    GameNotStarted,
    /// Start attempted outside the lobby.
    #[error("game has already started")]
    GameAlreadyStarted,
    /// The game is over; only a reset is possible.
    #[error("game has ended")]
    GameEnded,
    /// Admin-only action by a non-admin.
    #[error("only the admin can {0}")]
    NotAdmin(&'static str),
    /// Second admin join attempt.
    #[error("the game already has an admin")]
    AdminExists,
    /// Submission after the deadline.
    #[error("the submission window for this round has closed")]
    RoundExpired,
    /// Duplicate submission in the same round.
    #[error("a guess was already recorded this round")]
    AlreadySubmitted,
    /// Action from a connection that never joined.
    #[error("join the game first")]
    NotInGame,
    /// Malformed, unknown or out-of-phase action.
    #[error("invalid action: {0}")]
    InvalidAction(String),
}

impl GameError {
    /// Stable token identifying the error kind on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::NameInvalid(_) => "name_invalid",
            GameError::NameTaken(_) => "name_taken",
            GameError::GameFull(_) => "game_full",
            GameError::GameNotStarted => "game_not_started",
            GameError::GameAlreadyStarted => "game_already_started",
            GameError::GameEnded => "game_ended",
            GameError::NotAdmin(_) => "not_admin",
            GameError::AdminExists => "admin_exists",
            GameError::RoundExpired => "round_expired",
            GameError::AlreadySubmitted => "already_submitted",
            GameError::NotInGame => "not_in_game",
            GameError::InvalidAction(_) => "invalid_action",
        }
    }
}

impl From<InvalidTransition> for GameError {
    fn from(err: InvalidTransition) -> Self {
        match (err.from, err.event) {
            (_, GameEvent::StartGame) => GameError::GameAlreadyStarted,
            (GamePhase::Lobby, _) => GameError::GameNotStarted,
            (GamePhase::End, _) => GameError::GameEnded,
            _ => GameError::InvalidAction(err.to_string()),
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Action rejected by the game rules.
    #[error(transparent)]
    Game(#[from] GameError),
    /// Playlist sources could not produce a pool.
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
    /// Playlist storage could not be read.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Playback adapter reported a failure.
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Stable error kind token reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Game(err) => err.kind(),
            ServiceError::Playlist(err) => err.kind(),
            ServiceError::Unavailable(_) => "storage_unavailable",
            ServiceError::Playback(_) => "playback_failed",
            ServiceError::Timeout => "timeout",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::FinishReason;

    #[test]
    fn invalid_transitions_map_to_error_kinds() {
        let cases = [
            (GamePhase::Playing, GameEvent::StartGame, "game_already_started"),
            (GamePhase::End, GameEvent::StartGame, "game_already_started"),
            (GamePhase::Reveal, GameEvent::StartGame, "game_already_started"),
            (GamePhase::Lobby, GameEvent::NextRound, "game_not_started"),
            (GamePhase::Lobby, GameEvent::Finish(FinishReason::ManualStop), "game_not_started"),
            (GamePhase::End, GameEvent::NextRound, "game_ended"),
            (GamePhase::Reveal, GameEvent::Reset, "invalid_action"),
        ];

        for (from, event, kind) in cases {
            let err: GameError = InvalidTransition { from, event }.into();
            assert_eq!(err.kind(), kind, "{from:?} + {event:?}");
        }
    }

    #[test]
    fn service_errors_keep_the_game_kind() {
        let err: ServiceError = GameError::AlreadySubmitted.into();
        assert_eq!(err.kind(), "already_submitted");
        assert_eq!(ServiceError::Timeout.kind(), "timeout");
    }

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            GameError::NameTaken("Tom".into()).to_string(),
            "name `Tom` is already taken"
        );
        assert_eq!(
            GameError::NotAdmin("start the game").to_string(),
            "only the admin can start the game"
        );
    }
}

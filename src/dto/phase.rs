use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::{GamePhase, PausedFrom};

/// Publicly visible game phase exposed to clients (WebSocket/REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisiblePhase {
    /// Waiting for players.
    Lobby,
    /// A round is accepting guesses.
    Playing,
    /// The answer of the last round is shown.
    Reveal,
    /// Frozen until the admin returns.
    Paused,
    /// Final scoreboard.
    End,
}

impl From<&GamePhase> for VisiblePhase {
    fn from(value: &GamePhase) -> Self {
        match value {
            GamePhase::Lobby => VisiblePhase::Lobby,
            GamePhase::Playing => VisiblePhase::Playing,
            GamePhase::Reveal => VisiblePhase::Reveal,
            GamePhase::Paused(_) => VisiblePhase::Paused,
            GamePhase::End => VisiblePhase::End,
        }
    }
}

impl From<PausedFrom> for VisiblePhase {
    fn from(value: PausedFrom) -> Self {
        VisiblePhase::from(&GamePhase::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_serialize_in_upper_case() {
        let json = serde_json::to_string(&VisiblePhase::from(&GamePhase::Paused(
            PausedFrom::Reveal,
        )))
        .unwrap();
        assert_eq!(json, "\"PAUSED\"");
        assert_eq!(VisiblePhase::from(PausedFrom::Reveal), VisiblePhase::Reveal);
    }
}

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{snapshot::GameSnapshot, validation::validate_player_name},
    error::GameError,
};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
/// Messages accepted from WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the game or resume a session.
    Join(JoinRequest),
    /// Guess the year of the current song.
    Submit(SubmitRequest),
    /// Admin: start the first round.
    StartGame,
    /// Admin: stop the audio without closing the round.
    StopSong,
    /// Admin: move on to the next song.
    NextRound,
    /// Admin: change the playback volume.
    SetVolume(VolumeRequest),
    /// Admin: finish the game.
    EndGame,
    /// Admin: start over with a fresh lobby.
    ResetGame,
    /// Any unrecognised message type.
    #[serde(other)]
    Unknown,
}

/// Payload of a `join` message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema, Validate)]
pub struct JoinRequest {
    /// Requested display name.
    #[validate(custom(function = "validate_player_name"))]
    pub name: String,
    /// Claim the admin seat.
    #[serde(default)]
    pub as_admin: bool,
}

/// Payload of a `submit` message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct SubmitRequest {
    /// Guessed release year.
    pub year: i32,
    /// Double-or-nothing bet.
    #[serde(default)]
    pub bet: bool,
}

/// Payload of a `set_volume` message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema, Validate)]
pub struct VolumeRequest {
    /// Output level between 0.0 and 1.0.
    #[validate(range(min = 0.0, max = 1.0))]
    pub level: f32,
}

impl ClientMessage {
    /// Parse and validate an inbound text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, GameError> {
        let message: Self = serde_json::from_str(raw)
            .map_err(|err| GameError::InvalidAction(format!("malformed message: {err}")))?;

        match &message {
            ClientMessage::Join(request) => request
                .validate()
                .map_err(|errors| GameError::NameInvalid(errors.to_string()))?,
            ClientMessage::SetVolume(request) => request
                .validate()
                .map_err(|errors| GameError::InvalidAction(errors.to_string()))?,
            ClientMessage::Unknown => {
                return Err(GameError::InvalidAction("unknown message type".into()));
            }
            _ => {}
        }

        Ok(message)
    }

    /// Wire name of the action, echoed back in acknowledgements.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Join(_) => "join",
            ClientMessage::Submit(_) => "submit",
            ClientMessage::StartGame => "start_game",
            ClientMessage::StopSong => "stop_song",
            ClientMessage::NextRound => "next_round",
            ClientMessage::SetVolume(_) => "set_volume",
            ClientMessage::EndGame => "end_game",
            ClientMessage::ResetGame => "reset_game",
            ClientMessage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Messages pushed to WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Settled game snapshot, broadcast after every state change.
    State(GameSnapshot),
    /// Rejection of the sender's last message.
    Error {
        /// Stable error token.
        kind: String,
        /// Human-readable explanation.
        message: String,
    },
    /// Acceptance of the sender's last action.
    Ack {
        /// Action that was accepted.
        action: String,
    },
    /// Result of a successful join.
    Joined {
        /// Registered name.
        name: String,
        /// Whether the sender holds the admin seat.
        is_admin: bool,
        /// Identifier of the game joined.
        game_id: Uuid,
        /// Whether an earlier session was resumed.
        reconnected: bool,
    },
}

impl ServerMessage {
    /// Error reply for the sender.
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Acknowledgement for the sender.
    pub fn ack(action: &str) -> Self {
        ServerMessage::Ack {
            action: action.to_string(),
        }
    }
}

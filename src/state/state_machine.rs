use thiserror::Error;

/// Phase a game can be paused from, restored when the admin returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausedFrom {
    /// Waiting for players before the first round.
    Lobby,
    /// A round was accepting guesses.
    Playing,
    /// The answer of the last round was on display.
    Reveal,
}

impl From<PausedFrom> for GamePhase {
    fn from(value: PausedFrom) -> Self {
        match value {
            PausedFrom::Lobby => GamePhase::Lobby,
            PausedFrom::Playing => GamePhase::Playing,
            PausedFrom::Reveal => GamePhase::Reveal,
        }
    }
}

/// High-level phases the game can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Players are joining; no round has started.
    Lobby,
    /// A song is playing and guesses are accepted until the deadline.
    Playing,
    /// The answer is disclosed and the round has been scored.
    Reveal,
    /// The admin dropped; everything is frozen until they come back.
    Paused(PausedFrom),
    /// Final scoreboard; only a full reset leaves this phase.
    End,
}

/// Indicates why the game transitioned to its final phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every song of the pool has been played.
    PlaylistExhausted,
    /// The admin ended the game.
    ManualStop,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Admin starts the first round.
    StartGame,
    /// The submission window closed (deadline or everyone answered).
    Reveal,
    /// Admin moves on to a new song, from a reveal or skipping a live round.
    NextRound,
    /// Move to the final scoreboard.
    Finish(FinishReason),
    /// Admin transport dropped.
    Pause,
    /// Admin reconnected under the same name.
    Resume,
    /// Start over with a fresh lobby.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
}

/// State machine implementing the round flow of a game.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::Lobby,
            version: 0,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine initialised in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Phase to restore once a pause ends, if paused.
    pub fn paused_from(&self) -> Option<PausedFrom> {
        match self.phase {
            GamePhase::Paused(from) => Some(from),
            _ => None,
        }
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
        }
    }

    /// Check whether `event` would be accepted without applying it.
    pub fn can_apply(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        self.compute_transition(event)
    }

    /// Apply an event, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::Lobby, GameEvent::StartGame) => GamePhase::Playing,
            (GamePhase::Playing, GameEvent::Reveal) => GamePhase::Reveal,
            (GamePhase::Reveal | GamePhase::Playing, GameEvent::NextRound) => GamePhase::Playing,
            (GamePhase::Reveal | GamePhase::Playing, GameEvent::Finish(_)) => GamePhase::End,
            (GamePhase::Lobby, GameEvent::Pause) => GamePhase::Paused(PausedFrom::Lobby),
            (GamePhase::Playing, GameEvent::Pause) => GamePhase::Paused(PausedFrom::Playing),
            (GamePhase::Reveal, GameEvent::Pause) => GamePhase::Paused(PausedFrom::Reveal),
            (GamePhase::Paused(from), GameEvent::Resume) => from.into(),
            (GamePhase::End, GameEvent::Reset) => GamePhase::Lobby,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut GameStateMachine, event: GameEvent) -> GamePhase {
        sm.apply(event).unwrap()
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = GameStateMachine::new();
        assert_eq!(sm.phase(), GamePhase::Lobby);
        assert_eq!(sm.snapshot().version, 0);
    }

    #[test]
    fn full_happy_path_through_game() {
        let mut sm = GameStateMachine::new();

        assert_eq!(apply(&mut sm, GameEvent::StartGame), GamePhase::Playing);
        assert_eq!(apply(&mut sm, GameEvent::Reveal), GamePhase::Reveal);
        assert_eq!(apply(&mut sm, GameEvent::NextRound), GamePhase::Playing);
        assert_eq!(apply(&mut sm, GameEvent::Reveal), GamePhase::Reveal);
        assert_eq!(
            apply(&mut sm, GameEvent::Finish(FinishReason::PlaylistExhausted)),
            GamePhase::End
        );
        assert_eq!(apply(&mut sm, GameEvent::Reset), GamePhase::Lobby);
        assert_eq!(sm.snapshot().version, 6);
    }

    #[test]
    fn pause_restores_the_phase_it_came_from() {
        for (setup, expected) in [
            (vec![], GamePhase::Lobby),
            (vec![GameEvent::StartGame], GamePhase::Playing),
            (vec![GameEvent::StartGame, GameEvent::Reveal], GamePhase::Reveal),
        ] {
            let mut sm = GameStateMachine::new();
            for event in setup {
                apply(&mut sm, event);
            }
            let paused = apply(&mut sm, GameEvent::Pause);
            assert!(matches!(paused, GamePhase::Paused(_)));
            assert_eq!(sm.paused_from().map(GamePhase::from), Some(expected));
            assert_eq!(apply(&mut sm, GameEvent::Resume), expected);
        }
    }

    #[test]
    fn skipping_a_live_round_stays_in_playing() {
        let mut sm = GameStateMachine::new();
        apply(&mut sm, GameEvent::StartGame);
        assert_eq!(apply(&mut sm, GameEvent::NextRound), GamePhase::Playing);
    }

    #[test]
    fn end_is_terminal_until_reset() {
        let mut sm = GameStateMachine::new();
        apply(&mut sm, GameEvent::StartGame);
        apply(&mut sm, GameEvent::Finish(FinishReason::ManualStop));

        for event in [
            GameEvent::StartGame,
            GameEvent::NextRound,
            GameEvent::Pause,
            GameEvent::Reveal,
        ] {
            let err = sm.apply(event).unwrap_err();
            assert_eq!(err.from, GamePhase::End);
            assert_eq!(err.event, event);
        }
        assert_eq!(sm.phase(), GamePhase::End);
    }

    #[test]
    fn invalid_transition_returns_error_and_keeps_state() {
        let mut sm = GameStateMachine::new();
        apply(&mut sm, GameEvent::StartGame);
        let version = sm.snapshot().version;

        let err = sm.apply(GameEvent::StartGame).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: GamePhase::Playing,
                event: GameEvent::StartGame,
            }
        );
        assert_eq!(sm.phase(), GamePhase::Playing);
        assert_eq!(sm.snapshot().version, version);
    }

    #[test]
    fn cannot_pause_twice() {
        let mut sm = GameStateMachine::new();
        apply(&mut sm, GameEvent::Pause);
        assert!(sm.apply(GameEvent::Pause).is_err());
        assert!(sm.can_apply(GameEvent::Resume).is_ok());
    }
}

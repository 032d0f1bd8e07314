//! Scoring engine: turns one recorded guess into round points.
//!
//! Everything here is pure. The tier table and the speed multiplier are
//! selected through [`ScoringRules`] so either published rule set can be used
//! without touching the game state machine.

use serde::{Deserialize, Serialize};

/// Largest year difference that still counts as a "close enough" guess.
pub const CLOSE_ENOUGH_YEARS: u32 = 3;
/// Bonus points awarded per round of streak carried into the round.
pub const STREAK_BONUS_PER_ROUND: u32 = 5;
/// Multiplier applied to a winning bet.
const BET_WIN_MULTIPLIER: f64 = 2.0;

/// Base points table keyed by the absolute year difference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierTable {
    /// 10 / 7 / 5 / 3 / 1, never zero.
    #[default]
    Fine,
    /// 10 / 5 / 1 / 0.
    Coarse,
}

impl TierTable {
    /// Base points for a guess `diff` years away from the answer.
    pub fn base_points(self, diff: u32) -> u32 {
        match self {
            TierTable::Fine => match diff {
                0 => 10,
                1 => 7,
                2..=3 => 5,
                4..=5 => 3,
                _ => 1,
            },
            TierTable::Coarse => match diff {
                0 => 10,
                1..=3 => 5,
                4..=10 => 1,
                _ => 0,
            },
        }
    }
}

/// How fast answers are rewarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedBonus {
    /// `1.5 - 0.5 * ratio`: 1.5x for an instant guess, 1.0x at the deadline.
    #[default]
    Continuous,
    /// Thirds of the round: 1.5x, 1.2x, then 1.0x.
    Banded,
}

impl SpeedBonus {
    /// Multiplier for a submission made at `time_ratio` of the round (clamped to `[0, 1]`).
    pub fn multiplier(self, time_ratio: f64) -> f64 {
        let ratio = clamp_ratio(time_ratio);
        match self {
            SpeedBonus::Continuous => 1.5 - 0.5 * ratio,
            SpeedBonus::Banded => {
                if ratio <= 1.0 / 3.0 {
                    1.5
                } else if ratio <= 2.0 / 3.0 {
                    1.2
                } else {
                    1.0
                }
            }
        }
    }
}

/// Selected scoring rule set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    /// Base points table.
    pub tiers: TierTable,
    /// Speed multiplier formula.
    pub speed: SpeedBonus,
}

/// Inputs needed to score one recorded guess.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInput {
    /// Year guessed by the player.
    pub guess: i32,
    /// Curated year of the song.
    pub actual: i32,
    /// Elapsed submission time divided by the round duration.
    pub time_ratio: f64,
    /// Streak the player carried into this round.
    pub prior_streak: u32,
    /// Whether the player attached a double-or-nothing bet.
    pub bet: bool,
}

/// Result of scoring one guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    /// Points awarded for the round.
    pub points: u32,
    /// Absolute difference between guess and answer.
    pub years_off: u32,
    /// Whether the guess keeps the streak alive.
    pub close_enough: bool,
}

impl ScoringRules {
    /// Score a single recorded guess.
    pub fn score(&self, input: ScoreInput) -> ScoreOutcome {
        let years_off = input.guess.abs_diff(input.actual);
        let close_enough = years_off <= CLOSE_ENOUGH_YEARS;

        let base = f64::from(self.tiers.base_points(years_off));
        let speed = self.speed.multiplier(input.time_ratio);
        let streak_bonus = if close_enough {
            f64::from(input.prior_streak.saturating_mul(STREAK_BONUS_PER_ROUND))
        } else {
            0.0
        };
        let bet_multiplier = match (input.bet, close_enough) {
            (false, _) => 1.0,
            (true, true) => BET_WIN_MULTIPLIER,
            (true, false) => 0.0,
        };

        let raw = (base * speed + streak_bonus) * bet_multiplier;

        ScoreOutcome {
            points: round_half_up(raw),
            years_off,
            close_enough,
        }
    }
}

/// Fraction of the round consumed at submission time, clamped to `[0, 1]`.
pub fn time_ratio(elapsed_ms: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return 1.0;
    }
    clamp_ratio(elapsed_ms as f64 / duration_ms as f64)
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return 1.0;
    }
    ratio.clamp(0.0, 1.0)
}

fn round_half_up(value: f64) -> u32 {
    if value <= 0.0 {
        return 0;
    }
    (value + 0.5).floor() as u32
}

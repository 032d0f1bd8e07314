//! Application-level configuration loading: round timing, capacity, playlist
//! selection and the scoring rule set.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use validator::{Validate, ValidationErrors};

use crate::state::{game::GameSettings, scoring::ScoringRules};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BEATIFY_BACK_CONFIG_PATH";

/// Why a configuration document was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Not valid JSON for the expected shape.
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of its allowed range.
    #[error("invalid config values: {0}")]
    Invalid(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Submission window per round.
    #[validate(range(min = 1, max = 3600))]
    pub round_duration_secs: u64,
    /// How long a disconnected session stays reserved.
    #[validate(range(min = 1, max = 86_400))]
    pub reconnect_grace_secs: u64,
    /// Capacity of the session store.
    #[validate(range(min = 1, max = 1000))]
    pub max_players: usize,
    /// Reveal once every connected player submitted.
    pub early_reveal: bool,
    /// Period of the background expiry check.
    #[validate(range(min = 10, max = 10_000))]
    pub tick_interval_ms: u64,
    /// Time allowed for a single playback command.
    #[validate(range(min = 1, max = 120))]
    pub playback_timeout_secs: u64,
    /// Directory holding playlist JSON files.
    pub playlists_dir: PathBuf,
    /// Playlist file stems to load; all files when empty.
    pub playlists: Vec<String>,
    /// Scoring rule set.
    pub scoring: ScoringRules,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        round_secs = config.round_duration_secs,
                        max_players = config.max_players,
                        "loaded config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse and validate a configuration document. Missing keys take their default.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Game tunables derived from this configuration.
    pub fn game_settings(&self) -> GameSettings {
        GameSettings {
            round_duration_ms: self.round_duration_secs * 1_000,
            reconnect_grace_ms: self.reconnect_grace_secs * 1_000,
            max_players: self.max_players,
            early_reveal: self.early_reveal,
            scoring: self.scoring,
        }
    }

    /// Period of the background expiry check.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Time allowed for a single playback command.
    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: 30,
            reconnect_grace_secs: 60,
            max_players: 20,
            early_reveal: true,
            tick_interval_ms: 250,
            playback_timeout_secs: 5,
            playlists_dir: PathBuf::from("playlists"),
            playlists: Vec::new(),
            scoring: ScoringRules::default(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::scoring::{SpeedBonus, TierTable};

    #[test]
    fn missing_keys_take_defaults() {
        let config = AppConfig::from_json(r#"{"round_duration_secs": 45}"#).unwrap();
        assert_eq!(config.round_duration_secs, 45);
        assert_eq!(config.reconnect_grace_secs, 60);
        assert_eq!(config.max_players, 20);
        assert!(config.early_reveal);
        assert_eq!(config.scoring, ScoringRules::default());
    }

    #[test]
    fn scoring_rules_are_selectable() {
        let config = AppConfig::from_json(
            r#"{"scoring": {"tiers": "coarse", "speed": "banded"}, "playlists": ["eighties"]}"#,
        )
        .unwrap();
        assert_eq!(config.scoring.tiers, TierTable::Coarse);
        assert_eq!(config.scoring.speed, SpeedBonus::Banded);
        assert_eq!(config.playlists, vec!["eighties".to_string()]);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_json(r#"{"max_players": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_json(r#"{"round_duration_secs": "long"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn settings_are_converted_to_milliseconds() {
        let settings = AppConfig::default().game_settings();
        assert_eq!(settings.round_duration_ms, 30_000);
        assert_eq!(settings.reconnect_grace_ms, 60_000);
        assert_eq!(AppConfig::default().tick_interval(), Duration::from_millis(250));
    }
}

//! Playback Adapter: the seam between the game and whatever device plays audio.

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

use crate::state::game::SongMetadata;

/// Failure reported by a playback device.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    /// The device cannot be reached.
    #[error("playback device unavailable: {0}")]
    Unavailable(String),
    /// The device refused the media reference.
    #[error("cannot play `{uri}`: {reason}")]
    Rejected {
        /// Media reference that failed.
        uri: String,
        /// Device-provided reason.
        reason: String,
    },
}

/// Asynchronous control surface of an audio device.
///
/// Commands run outside the game lock; their outcome is fed back into the
/// game afterwards.
pub trait PlaybackAdapter: Send + Sync {
    /// Start playing `uri`, resolving with whatever metadata the device knows.
    fn play(&self, uri: &str) -> BoxFuture<'static, Result<SongMetadata, PlaybackError>>;
    /// Stop audio.
    fn stop(&self) -> BoxFuture<'static, Result<(), PlaybackError>>;
    /// Set the output volume in `0.0..=1.0`.
    fn set_volume(&self, level: f32) -> BoxFuture<'static, Result<(), PlaybackError>>;
}

/// Adapter that only logs commands. Used when no device is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPlayback;

impl PlaybackAdapter for LogPlayback {
    fn play(&self, uri: &str) -> BoxFuture<'static, Result<SongMetadata, PlaybackError>> {
        let uri = uri.to_string();
        Box::pin(async move {
            info!(%uri, "playback: play");
            Ok(SongMetadata::default())
        })
    }

    fn stop(&self) -> BoxFuture<'static, Result<(), PlaybackError>> {
        Box::pin(async {
            info!("playback: stop");
            Ok(())
        })
    }

    fn set_volume(&self, level: f32) -> BoxFuture<'static, Result<(), PlaybackError>> {
        Box::pin(async move {
            info!(level, "playback: set volume");
            Ok(())
        })
    }
}

//! Song pool: validated songs from one or more playlist sources, with the
//! `played` bookkeeping that drives random round selection.

use std::{collections::HashSet, fmt};

use rand::{Rng, seq::IteratorRandom};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One playlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    /// Curated release year; the answer of the round.
    pub year: i32,
    /// Opaque playback reference handed to the playback adapter.
    pub uri: String,
    /// Optional trivia revealed with the answer.
    pub fun_fact: Option<String>,
    /// Whether the song was already selected for a round in this game.
    pub played: bool,
}

impl Song {
    /// Build an unplayed song.
    pub fn new(year: i32, uri: impl Into<String>, fun_fact: Option<String>) -> Self {
        Self {
            year,
            uri: uri.into(),
            fun_fact,
            played: false,
        }
    }
}

/// Raw playlist content as read from a source, before validation.
#[derive(Debug, Clone)]
pub struct PlaylistSource {
    /// Name used when reporting issues (usually the file name).
    pub name: String,
    /// Unparsed JSON document.
    pub raw: String,
}

/// Actionable description of a malformed playlist record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistIssue {
    /// Source the record came from.
    pub source: String,
    /// Index of the record inside the source, absent for document-level problems.
    pub index: Option<usize>,
    /// What is wrong with it.
    pub reason: String,
}

impl fmt::Display for PlaylistIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]: {}", self.source, index, self.reason),
            None => write!(f, "{}: {}", self.source, self.reason),
        }
    }
}

/// Failure to build a usable pool.
#[derive(Debug, Clone, Error)]
pub enum PlaylistError {
    /// Every record was rejected (or there were none).
    #[error("no playable songs found ({} issue(s))", issues.len())]
    NoValidSongs {
        /// Itemized rejections.
        issues: Vec<PlaylistIssue>,
    },
}

impl PlaylistError {
    /// Stable error kind token.
    pub fn kind(&self) -> &'static str {
        "playlist_validation"
    }
}

/// Pool built from sources plus the records that were skipped.
#[derive(Debug, Clone)]
pub struct LoadedPool {
    /// Valid songs.
    pub pool: SongPool,
    /// Records that were rejected.
    pub issues: Vec<PlaylistIssue>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlaylistDocument {
    Wrapped { songs: Vec<Value> },
    Bare(Vec<Value>),
}

/// Combined, deduplicated set of songs for one game.
#[derive(Debug, Clone, Default)]
pub struct SongPool {
    songs: Vec<Song>,
}

impl SongPool {
    /// Build a pool from already-validated songs, dropping duplicate URIs.
    pub fn from_songs(songs: impl IntoIterator<Item = Song>) -> Self {
        let mut seen = HashSet::new();
        let songs = songs
            .into_iter()
            .filter(|song| seen.insert(song.uri.clone()))
            .collect();
        Self { songs }
    }

    /// Validate every source and keep the well-formed songs.
    ///
    /// Malformed records are itemized and skipped; loading only fails when no
    /// playable song remains.
    pub fn load(sources: impl IntoIterator<Item = PlaylistSource>) -> Result<LoadedPool, PlaylistError> {
        let mut issues = Vec::new();
        let mut songs = Vec::new();
        let mut seen = HashSet::new();

        for source in sources {
            let records = match serde_json::from_str::<PlaylistDocument>(&source.raw) {
                Ok(PlaylistDocument::Wrapped { songs }) | Ok(PlaylistDocument::Bare(songs)) => songs,
                Err(err) => {
                    issues.push(PlaylistIssue {
                        source: source.name.clone(),
                        index: None,
                        reason: format!("not a playlist document: {err}"),
                    });
                    continue;
                }
            };

            let before = songs.len();
            for (index, record) in records.iter().enumerate() {
                match parse_record(record) {
                    Ok(song) => {
                        if seen.insert(song.uri.clone()) {
                            songs.push(song);
                        } else {
                            debug!(source = %source.name, index, uri = %song.uri, "duplicate song skipped");
                        }
                    }
                    Err(reason) => issues.push(PlaylistIssue {
                        source: source.name.clone(),
                        index: Some(index),
                        reason,
                    }),
                }
            }
            info!(source = %source.name, songs = songs.len() - before, "playlist source loaded");
        }

        for issue in &issues {
            warn!(%issue, "playlist record rejected");
        }

        if songs.is_empty() {
            return Err(PlaylistError::NoValidSongs { issues });
        }

        Ok(LoadedPool {
            pool: Self { songs },
            issues,
        })
    }

    /// Pick an unplayed song uniformly at random.
    pub fn next_unplayed<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Song> {
        self.songs
            .iter()
            .filter(|song| !song.played)
            .choose(rng)
            .cloned()
    }

    /// Exclude a song from further selection until the next reset.
    pub fn mark_played(&mut self, uri: &str) -> bool {
        match self.songs.iter_mut().find(|song| song.uri == uri) {
            Some(song) => {
                song.played = true;
                true
            }
            None => false,
        }
    }

    /// Make every song available again.
    pub fn reset_played(&mut self) {
        self.songs.iter_mut().for_each(|song| song.played = false);
    }

    /// Number of songs not yet played.
    pub fn remaining_count(&self) -> usize {
        self.songs.iter().filter(|song| !song.played).count()
    }

    /// Total number of songs in the pool.
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// Whether the pool holds no song at all.
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

fn parse_record(record: &Value) -> Result<Song, String> {
    let object = record
        .as_object()
        .ok_or_else(|| "song record must be an object".to_string())?;

    let year = match object.get("year") {
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(|year| i32::try_from(year).ok())
            .ok_or_else(|| format!("`year` must be an integer (got {number})"))?,
        Some(other) => return Err(format!("`year` must be an integer (got {other})")),
        None => return Err("missing `year`".into()),
    };

    let uri = match object.get("uri") {
        Some(Value::String(uri)) if !uri.trim().is_empty() => uri.trim().to_string(),
        Some(Value::String(_)) => return Err("`uri` must not be empty".into()),
        Some(_) => return Err("`uri` must be a string".into()),
        None => return Err("missing `uri`".into()),
    };

    let fun_fact = object
        .get("fun_fact")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|fact| !fact.is_empty())
        .map(str::to_string);

    Ok(Song::new(year, uri, fun_fact))
}

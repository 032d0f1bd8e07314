use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::{
    dao::storage::{StorageError, StorageResult},
    state::playlist::PlaylistSource,
};

const PLAYLIST_EXTENSION: &str = "json";

/// Abstraction over where playlist documents come from.
pub trait PlaylistStore: Send + Sync {
    /// Read every selected playlist document, unparsed.
    fn list_sources(&self) -> BoxFuture<'static, StorageResult<Vec<PlaylistSource>>>;
    /// Check that the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Playlists stored as `*.json` files inside one directory.
#[derive(Debug, Clone)]
pub struct FsPlaylistStore {
    dir: PathBuf,
    selected: Vec<String>,
}

impl FsPlaylistStore {
    /// Read playlists from `dir`, restricted to the given file stems when not empty.
    pub fn new(dir: impl Into<PathBuf>, selected: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            selected,
        }
    }

    fn is_selected(&self, path: &Path) -> bool {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PLAYLIST_EXTENSION));
        if !is_json {
            return false;
        }
        if self.selected.is_empty() {
            return true;
        }
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| self.selected.iter().any(|name| name == stem))
    }
}

impl PlaylistStore for FsPlaylistStore {
    fn list_sources(&self) -> BoxFuture<'static, StorageResult<Vec<PlaylistSource>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&store.dir).await.map_err(|err| {
                StorageError::unavailable(
                    format!("cannot list playlists in `{}`", store.dir.display()),
                    err,
                )
            })?;

            let mut paths = Vec::new();
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if store.is_selected(&path) {
                            paths.push(path);
                        } else {
                            debug!(path = %path.display(), "skipping non-selected file");
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        return Err(StorageError::unavailable(
                            format!("cannot list playlists in `{}`", store.dir.display()),
                            err,
                        ));
                    }
                }
            }
            paths.sort();

            let mut sources = Vec::with_capacity(paths.len());
            for path in paths {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                match tokio::fs::read_to_string(&path).await {
                    Ok(raw) => sources.push(PlaylistSource { name, raw }),
                    Err(err) => warn!(path = %path.display(), error = %err, "unreadable playlist skipped"),
                }
            }

            for wanted in &store.selected {
                if !sources
                    .iter()
                    .any(|source| source.name.strip_suffix(".json") == Some(wanted.as_str()))
                {
                    warn!(playlist = %wanted, "configured playlist not found");
                }
            }

            info!(dir = %store.dir.display(), count = sources.len(), "playlist sources read");
            Ok(sources)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.dir.clone();
        Box::pin(async move {
            match tokio::fs::metadata(&dir).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                Ok(_) => Err(StorageError::unavailable(
                    format!("`{}` is not a directory", dir.display()),
                    std::io::Error::from(ErrorKind::NotADirectory),
                )),
                Err(err) => Err(StorageError::unavailable(
                    format!("cannot access `{}`", dir.display()),
                    err,
                )),
            }
        })
    }
}

/// Playlist sources read from the filesystem.
pub mod playlist_store;
/// Storage error types shared by backends.
pub mod storage;

//! Host-facing callback interface.
//!
//! All notifications are invoked from library worker threads; entity change
//! callbacks carry batched ids. Every method has a no-op default so hosts
//! only implement what they display.

/// Outcome of [`crate::MediaLibrary::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitResult {
    Success,
    AlreadyInitialized,
    /// The database was dropped and recreated (downgrade or failed upgrade).
    DbReset,
    Failed,
}

/// Notification sink provided by the host at initialization time.
#[allow(unused_variables)]
pub trait LibraryCallback: Send + Sync {
    fn on_media_added(&self, media: Vec<i64>) {}
    fn on_media_modified(&self, media: Vec<i64>) {}
    fn on_media_deleted(&self, media: Vec<i64>) {}

    fn on_albums_added(&self, albums: Vec<i64>) {}
    fn on_albums_modified(&self, albums: Vec<i64>) {}
    fn on_albums_deleted(&self, albums: Vec<i64>) {}

    fn on_artists_added(&self, artists: Vec<i64>) {}
    fn on_artists_modified(&self, artists: Vec<i64>) {}
    fn on_artists_deleted(&self, artists: Vec<i64>) {}

    fn on_tracks_added(&self, tracks: Vec<i64>) {}
    fn on_tracks_deleted(&self, tracks: Vec<i64>) {}

    fn on_playlists_added(&self, playlists: Vec<i64>) {}
    fn on_playlists_modified(&self, playlists: Vec<i64>) {}
    fn on_playlists_deleted(&self, playlists: Vec<i64>) {}

    fn on_discovery_started(&self, entry_point: &str) {}
    fn on_discovery_progress(&self, entry_point: &str) {}
    fn on_discovery_completed(&self, entry_point: &str) {}

    fn on_reload_started(&self, entry_point: &str) {}
    fn on_reload_completed(&self, entry_point: &str) {}

    fn on_entry_point_removed(&self, entry_point: &str, success: bool) {}
    fn on_entry_point_banned(&self, entry_point: &str, success: bool) {}
    fn on_entry_point_unbanned(&self, entry_point: &str, success: bool) {}

    fn on_parsing_stats_updated(&self, percent: u32) {}
    fn on_background_tasks_idle_changed(&self, idle: bool) {}
}

/// Callback that ignores everything. Useful for headless embedders and
/// tests.
pub struct NoopCallback;

impl LibraryCallback for NoopCallback {}

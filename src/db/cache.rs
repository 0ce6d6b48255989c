//! Process-wide identity map for persisted entities.
//!
//! At most one live in-memory record exists per `(entity kind, row id)`
//! while it is referenced. Mutations go through the live record inside the
//! same call that persists them, so readers holding the pointer observe the
//! new state after commit. Eviction happens from the delete hook (and
//! explicitly on destroy), before any subsequent load can observe the row.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::model::album::Album;
use crate::model::album_track::AlbumTrack;
use crate::model::artist::Artist;
use crate::model::audio_track::AudioTrack;
use crate::model::device::Device;
use crate::model::file::File;
use crate::model::folder::Folder;
use crate::model::genre::Genre;
use crate::model::history::History;
use crate::model::label::Label;
use crate::model::media::Media;
use crate::model::movie::Movie;
use crate::model::playlist::Playlist;
use crate::model::show::{Show, ShowEpisode};

/// Shared handle to a live entity record.
pub type EntityPtr<T> = Arc<RwLock<T>>;

/// One identity map shard, covering a single entity kind.
pub struct CacheShard<T> {
    entries: Mutex<HashMap<i64, EntityPtr<T>>>,
}

impl<T> Default for CacheShard<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> CacheShard<T> {
    /// Existing live record, if any.
    pub fn get(&self, id: i64) -> Option<EntityPtr<T>> {
        self.entries.lock().get(&id).cloned()
    }

    /// Return the live record for `id`, loading it through `loader` when
    /// absent. If a concurrent load won the race, the already-cached record
    /// wins and the freshly loaded one is discarded.
    pub fn get_or_load<F>(&self, id: i64, loader: F) -> Result<Option<EntityPtr<T>>>
    where
        F: FnOnce() -> Result<Option<T>>,
    {
        if let Some(existing) = self.get(id) {
            return Ok(Some(existing));
        }
        let loaded = match loader()? {
            Some(record) => record,
            None => return Ok(None),
        };
        Ok(Some(self.adopt(id, loaded)))
    }

    /// Insert `record` unless a live instance for `id` already exists, and
    /// return the canonical pointer either way.
    pub fn adopt(&self, id: i64, record: T) -> EntityPtr<T> {
        let mut entries = self.entries.lock();
        entries
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(record)))
            .clone()
    }

    /// Drop the entry for `id`; later fetches reload from the database.
    pub fn remove(&self, id: i64) {
        self.entries.lock().remove(&id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// All shards, one per entity kind.
#[derive(Default)]
pub struct EntityCache {
    pub media: CacheShard<Media>,
    pub files: CacheShard<File>,
    pub folders: CacheShard<Folder>,
    pub devices: CacheShard<Device>,
    pub albums: CacheShard<Album>,
    pub album_tracks: CacheShard<AlbumTrack>,
    pub artists: CacheShard<Artist>,
    pub audio_tracks: CacheShard<AudioTrack>,
    pub genres: CacheShard<Genre>,
    pub labels: CacheShard<Label>,
    pub playlists: CacheShard<Playlist>,
    pub shows: CacheShard<Show>,
    pub show_episodes: CacheShard<ShowEpisode>,
    pub movies: CacheShard<Movie>,
    pub history: CacheShard<History>,
}

impl EntityCache {
    /// Empty every shard. Used on library reset and force-rescan.
    pub fn clear(&self) {
        self.media.clear();
        self.files.clear();
        self.folders.clear();
        self.devices.clear();
        self.albums.clear();
        self.album_tracks.clear();
        self.artists.clear();
        self.audio_tracks.clear();
        self.genres.clear();
        self.labels.clear();
        self.playlists.clear();
        self.shows.clear();
        self.show_episodes.clear();
        self.movies.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_load_returns_same_instance() {
        let shard: CacheShard<String> = CacheShard::default();
        let a = shard
            .get_or_load(1, || Ok(Some("one".to_string())))
            .unwrap()
            .unwrap();
        let b = shard
            .get_or_load(1, || panic!("loader must not run for cached ids"))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn remove_forces_reload() {
        let shard: CacheShard<String> = CacheShard::default();
        let a = shard
            .get_or_load(1, || Ok(Some("one".to_string())))
            .unwrap()
            .unwrap();
        shard.remove(1);
        let b = shard
            .get_or_load(1, || Ok(Some("one again".to_string())))
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*b.read(), "one again");
    }

    #[test]
    fn missing_rows_are_not_cached() {
        let shard: CacheShard<String> = CacheShard::default();
        assert!(shard.get_or_load(7, || Ok(None)).unwrap().is_none());
        assert_eq!(shard.len(), 0);
    }
}

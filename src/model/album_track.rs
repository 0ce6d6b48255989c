//! Album tracks: the 1:1 link between an audio media and its album,
//! carrying track/disc numbers and the artist and genre edges.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::album::AlbumPtr;
use crate::model::artist::ArtistPtr;
use crate::model::media::MediaPtr;
use crate::model::MediaSubType;

pub type AlbumTrackPtr = EntityPtr<AlbumTrack>;

#[derive(Debug, Clone, Serialize)]
pub struct AlbumTrack {
    id: i64,
    media_id: i64,
    artist_id: Option<i64>,
    genre_id: Option<i64>,
    track_number: i64,
    album_id: i64,
    disc_number: i64,
    is_present: bool,
}

impl DatabaseEntity for AlbumTrack {
    const TABLE: &'static str = "AlbumTrack";
    const PRIMARY_KEY: &'static str = "id_track";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_track")?,
            media_id: row.get("media_id")?,
            artist_id: row.get("artist_id")?,
            genre_id: row.get("genre_id")?,
            track_number: row.get("track_number")?,
            album_id: row.get("album_id")?,
            disc_number: row.get("disc_number")?,
            is_present: row.get("is_present")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.album_tracks
    }
}

impl AlbumTrack {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS AlbumTrack (
                id_track INTEGER PRIMARY KEY AUTOINCREMENT,
                media_id INTEGER UNIQUE,
                artist_id UNSIGNED INTEGER,
                genre_id INTEGER,
                track_number UNSIGNED INTEGER,
                album_id UNSIGNED INTEGER NOT NULL,
                disc_number UNSIGNED INTEGER,
                is_present BOOLEAN NOT NULL DEFAULT 1,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE,
                FOREIGN KEY (artist_id) REFERENCES Artist(id_artist) ON DELETE CASCADE,
                FOREIGN KEY (genre_id) REFERENCES Genre(id_genre),
                FOREIGN KEY (album_id) REFERENCES Album(id_album) ON DELETE CASCADE
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS is_track_present
             AFTER UPDATE OF is_present ON Media
             BEGIN
                UPDATE AlbumTrack SET is_present = new.is_present
                    WHERE media_id = new.id_media;
             END;
             CREATE INDEX IF NOT EXISTS album_track_album_idx ON AlbumTrack(album_id);
             CREATE INDEX IF NOT EXISTS album_track_artist_idx ON AlbumTrack(artist_id);",
        )?;
        Ok(())
    }

    /// Link `media` into `album`. Database-side counters move through
    /// triggers; the live album/artist records are adjusted here so cached
    /// instances stay coherent.
    ///
    /// Callers must not hold read or write guards on `media`, `album` or
    /// `artist`.
    pub fn create(
        core: &Core,
        media: &MediaPtr,
        album: &AlbumPtr,
        artist: Option<&ArtistPtr>,
        genre_id: Option<i64>,
        track_number: i64,
        disc_number: i64,
    ) -> Result<AlbumTrackPtr> {
        let media_id = media.read().id();
        let album_id = album.read().id();
        let artist_id = artist.map(|a| a.read().id());
        let record = AlbumTrack {
            id: 0,
            media_id,
            artist_id,
            genre_id,
            track_number,
            album_id,
            disc_number,
            is_present: media.read().is_present(),
        };
        let track = entity::insert(
            core,
            record,
            "INSERT INTO AlbumTrack(media_id, artist_id, genre_id, track_number,
                                    album_id, disc_number)
             VALUES(?, ?, ?, ?, ?, ?)",
            params![media_id, artist_id, genre_id, track_number, album_id, disc_number],
        )?;
        media.write().set_subtype(core, MediaSubType::AlbumTrack)?;
        // Mirror the trigger-maintained counters on the live records.
        {
            let duration = media.read().duration().max(0);
            let mut album = album.write();
            album.mirror_track_added(duration);
        }
        if let Some(artist) = artist {
            artist.write().mirror_track_added();
        }
        Ok(track)
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<AlbumTrackPtr>> {
        entity::fetch(core, id)
    }

    pub fn from_media(core: &Core, media_id: i64) -> Result<Option<AlbumTrackPtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM AlbumTrack WHERE media_id = ?",
            [media_id],
        )
    }

    /// Remove a track link. The triggers take care of the album and artist
    /// counters and of deleting emptied albums/artists, so the cached
    /// instances of both kinds are dropped wholesale.
    pub fn destroy(core: &Core, id: i64) -> Result<bool> {
        let deleted = entity::destroy::<AlbumTrack>(core, id)?;
        if deleted {
            core.cache.albums.clear();
            core.cache.artists.clear();
        }
        Ok(deleted)
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM AlbumTrack", [])?;
        core.cache.album_tracks.clear();
        core.cache.albums.clear();
        core.cache.artists.clear();
        Ok(())
    }

    pub fn media_id(&self) -> i64 {
        self.media_id
    }

    pub fn album_id(&self) -> i64 {
        self.album_id
    }

    pub fn artist_id(&self) -> Option<i64> {
        self.artist_id
    }

    pub fn genre_id(&self) -> Option<i64> {
        self.genre_id
    }

    pub fn track_number(&self) -> i64 {
        self.track_number
    }

    pub fn disc_number(&self) -> i64 {
        self.disc_number
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    pub fn set_genre(&mut self, core: &Core, genre_id: i64) -> Result<()> {
        core.db.writer().execute(
            "UPDATE AlbumTrack SET genre_id = ? WHERE id_track = ?",
            params![genre_id, self.id],
        )?;
        self.genre_id = Some(genre_id);
        Ok(())
    }
}

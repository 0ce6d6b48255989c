//! Artists, including the two reserved rows that always exist: id 1 for
//! tracks with no artist tag and id 2 for multi-artist albums.
//!
//! An artist that loses its last album and track is deleted by trigger;
//! the reserved rows are spared.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::album::{Album, AlbumPtr};
use crate::model::media::MediaPtr;
use crate::model::{fts_prefix_query, SortingCriteria};

pub type ArtistPtr = EntityPtr<Artist>;

/// Reserved row collecting tracks with no artist tag.
pub const UNKNOWN_ARTIST_ID: i64 = 1;
/// Reserved row used as album artist for multi-artist albums.
pub const VARIOUS_ARTISTS_ID: i64 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Artist {
    id: i64,
    name: Option<String>,
    shortbio: Option<String>,
    artwork_mrl: Option<String>,
    nb_albums: i64,
    nb_tracks: i64,
    mb_id: Option<String>,
    is_present: bool,
}

impl DatabaseEntity for Artist {
    const TABLE: &'static str = "Artist";
    const PRIMARY_KEY: &'static str = "id_artist";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_artist")?,
            name: row.get("name")?,
            shortbio: row.get("shortbio")?,
            artwork_mrl: row.get("artwork_mrl")?,
            nb_albums: row.get::<_, Option<i64>>("nb_albums")?.unwrap_or(0),
            nb_tracks: row.get::<_, Option<i64>>("nb_tracks")?.unwrap_or(0),
            mb_id: row.get("mb_id")?,
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
        &cache.artists
    }
}

impl Artist {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Artist (
                id_artist INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT COLLATE NOCASE UNIQUE ON CONFLICT FAIL,
                shortbio TEXT,
                artwork_mrl TEXT,
                nb_albums UNSIGNED INT NOT NULL DEFAULT 0,
                nb_tracks UNSIGNED INT NOT NULL DEFAULT 0,
                mb_id TEXT,
                is_present BOOLEAN NOT NULL DEFAULT 1
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS ArtistFts USING FTS4(name);",
        )?;
        Ok(())
    }

    /// Insert the reserved rows. Idempotent; called on every fresh schema
    /// and after a force-rescan wiped the artists.
    pub fn create_default_artists(conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO Artist(id_artist) VALUES(?), (?)",
            params![UNKNOWN_ARTIST_ID, VARIOUS_ARTISTS_ID],
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection, model_version: u32) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS has_album_present
             AFTER UPDATE OF is_present ON Album
             WHEN new.artist_id IS NOT NULL
             BEGIN
                UPDATE Artist SET is_present =
                    (SELECT EXISTS(
                        SELECT id_album FROM Album
                            WHERE artist_id = new.artist_id AND is_present != 0))
                    WHERE id_artist = new.artist_id;
             END;
             CREATE TRIGGER IF NOT EXISTS has_album_remaining
             AFTER DELETE ON Album
             WHEN old.artist_id IS NOT NULL
             BEGIN
                UPDATE Artist SET nb_albums = nb_albums - 1
                    WHERE id_artist = old.artist_id;
                DELETE FROM Artist
                    WHERE id_artist = old.artist_id
                    AND nb_albums = 0 AND nb_tracks = 0
                    AND id_artist NOT IN (1, 2);
             END;
             CREATE TRIGGER IF NOT EXISTS insert_artist_fts
             AFTER INSERT ON Artist
             WHEN new.name IS NOT NULL
             BEGIN
                INSERT INTO ArtistFts(rowid, name) VALUES(new.id_artist, new.name);
             END;
             CREATE TRIGGER IF NOT EXISTS delete_artist_fts
             BEFORE DELETE ON Artist
             WHEN old.name IS NOT NULL
             BEGIN
                DELETE FROM ArtistFts WHERE rowid = old.id_artist;
             END;",
        )?;
        // Track counting arrived with model 8; older schemas recreate their
        // triggers without it mid-migration.
        if model_version >= 8 {
            conn.execute_batch(
                "CREATE TRIGGER IF NOT EXISTS add_artist_track
                 AFTER INSERT ON AlbumTrack
                 WHEN new.artist_id IS NOT NULL
                 BEGIN
                    UPDATE Artist SET nb_tracks = nb_tracks + 1
                        WHERE id_artist = new.artist_id;
                 END;
                 CREATE TRIGGER IF NOT EXISTS has_track_remaining
                 AFTER DELETE ON AlbumTrack
                 WHEN old.artist_id IS NOT NULL
                 BEGIN
                    UPDATE Artist SET nb_tracks = nb_tracks - 1
                        WHERE id_artist = old.artist_id;
                    DELETE FROM Artist
                        WHERE id_artist = old.artist_id
                        AND nb_albums = 0 AND nb_tracks = 0
                        AND id_artist NOT IN (1, 2);
                 END;",
            )?;
        }
        Ok(())
    }

    pub fn create(core: &Core, name: &str) -> Result<ArtistPtr> {
        let record = Artist {
            id: 0,
            name: Some(name.to_string()),
            shortbio: None,
            artwork_mrl: None,
            nb_albums: 0,
            nb_tracks: 0,
            mb_id: None,
            is_present: true,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Artist(name) VALUES(?)",
            params![name],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<ArtistPtr>> {
        entity::fetch(core, id)
    }

    /// Present artist by exact name.
    pub fn by_name(core: &Core, name: &str) -> Result<Option<ArtistPtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM Artist WHERE name = ? AND is_present != 0",
            [name],
        )
    }

    /// Every artist, or only those with at least one album. The reserved
    /// rows are never listed.
    pub fn list_all(
        core: &Core,
        include_all: bool,
        _sort: SortingCriteria,
        desc: bool,
    ) -> Result<Vec<ArtistPtr>> {
        // Artists only have a meaningful alphabetical order.
        let dir = if desc { " DESC" } else { "" };
        let filter = if include_all {
            "is_present != 0"
        } else {
            "nb_albums > 0 AND is_present != 0"
        };
        let sql = format!(
            "SELECT * FROM Artist WHERE id_artist > 2 AND {} ORDER BY name{}",
            filter, dir
        );
        entity::fetch_all(core, &sql, [])
    }

    pub fn search(core: &Core, pattern: &str) -> Result<Vec<ArtistPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Artist
             WHERE id_artist IN (SELECT rowid FROM ArtistFts WHERE ArtistFts MATCH ?)
             AND is_present != 0 AND id_artist > 2",
            [fts_prefix_query(pattern)],
        )
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM Artist", [])?;
        core.cache.artists.clear();
        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn short_bio(&self) -> Option<&str> {
        self.shortbio.as_deref()
    }

    pub fn artwork_mrl(&self) -> Option<&str> {
        self.artwork_mrl.as_deref()
    }

    pub fn musicbrainz_id(&self) -> Option<&str> {
        self.mb_id.as_deref()
    }

    pub fn nb_albums(&self) -> i64 {
        self.nb_albums
    }

    pub fn nb_tracks(&self) -> i64 {
        self.nb_tracks
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    /// This artist's title-less album, created on first use. Not listed by
    /// album search.
    pub fn unknown_album(&self, core: &Core) -> Result<AlbumPtr> {
        match Album::unknown_album_of(core, self.id)? {
            Some(album) => Ok(album),
            None => Album::create_unknown(core, self.id),
        }
    }

    /// Present media credited to this artist.
    ///
    /// With [`SortingCriteria::Album`], tracks come out grouped by album
    /// (most recent release first when descending), then disc, then track
    /// number.
    pub fn media(&self, core: &Core, sort: SortingCriteria, desc: bool) -> Result<Vec<MediaPtr>> {
        let dir = if desc { " DESC" } else { "" };
        let sql = match sort {
            SortingCriteria::Album => format!(
                "SELECT med.* FROM Media med
                 INNER JOIN AlbumTrack att ON att.media_id = med.id_media
                 INNER JOIN Album alb ON alb.id_album = att.album_id
                 WHERE att.artist_id = ? AND med.is_present != 0
                 ORDER BY alb.release_year{}, alb.title,
                          att.disc_number, att.track_number, med.title",
                dir
            ),
            SortingCriteria::Duration => format!(
                "SELECT med.* FROM Media med
                 INNER JOIN AlbumTrack att ON att.media_id = med.id_media
                 WHERE att.artist_id = ? AND med.is_present != 0
                 ORDER BY med.duration{}, med.title",
                dir
            ),
            SortingCriteria::ReleaseDate => format!(
                "SELECT med.* FROM Media med
                 INNER JOIN AlbumTrack att ON att.media_id = med.id_media
                 WHERE att.artist_id = ? AND med.is_present != 0
                 ORDER BY med.release_date{}, med.title",
                dir
            ),
            _ => format!(
                "SELECT med.* FROM Media med
                 INNER JOIN AlbumTrack att ON att.media_id = med.id_media
                 WHERE att.artist_id = ? AND med.is_present != 0
                 ORDER BY med.title{}",
                dir
            ),
        };
        entity::fetch_all(core, &sql, [self.id])
    }

    /// Albums credited to this artist, newest release first.
    pub fn albums(&self, core: &Core) -> Result<Vec<AlbumPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Album
             WHERE artist_id = ? AND title IS NOT NULL AND is_present != 0
             ORDER BY release_year DESC, title",
            [self.id],
        )
    }

    pub fn set_short_bio(&mut self, core: &Core, bio: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Artist SET shortbio = ? WHERE id_artist = ?",
            params![bio, self.id],
        )?;
        self.shortbio = Some(bio.to_string());
        Ok(())
    }

    pub fn set_artwork_mrl(&mut self, core: &Core, mrl: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Artist SET artwork_mrl = ? WHERE id_artist = ?",
            params![mrl, self.id],
        )?;
        self.artwork_mrl = Some(mrl.to_string());
        Ok(())
    }

    pub fn set_musicbrainz_id(&mut self, core: &Core, mb_id: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Artist SET mb_id = ? WHERE id_artist = ?",
            params![mb_id, self.id],
        )?;
        self.mb_id = Some(mb_id.to_string());
        Ok(())
    }

    pub(crate) fn mirror_track_added(&mut self) {
        self.nb_tracks += 1;
    }

    /// Adjust the album counter from the album-artist assignment path. The
    /// live record, when cached, is kept in step.
    pub(crate) fn update_nb_albums(core: &Core, artist_id: i64, delta: i64) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Artist SET nb_albums = nb_albums + ? WHERE id_artist = ?",
            params![delta, artist_id],
        )?;
        if let Some(artist) = core.cache.artists.get(artist_id) {
            artist.write().nb_albums += delta;
        }
        Ok(())
    }
}

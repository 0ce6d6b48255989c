//! Albums, including the per-artist "unknown album" that collects tracks
//! with no album tag.
//!
//! Track counters, cumulated duration, presence and the album's own
//! lifetime (deleted when the last track goes) are maintained by triggers.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::artist::{Artist, ArtistPtr};
use crate::model::media::MediaPtr;
use crate::model::{fts_prefix_query, SortingCriteria};

pub type AlbumPtr = EntityPtr<Album>;

#[derive(Debug, Clone, Serialize)]
pub struct Album {
    id: i64,
    title: Option<String>,
    artist_id: Option<i64>,
    release_year: i64,
    release_year_latched: bool,
    short_summary: Option<String>,
    artwork_mrl: Option<String>,
    nb_tracks: i64,
    duration: i64,
    is_present: bool,
}

impl DatabaseEntity for Album {
    const TABLE: &'static str = "Album";
    const PRIMARY_KEY: &'static str = "id_album";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_album")?,
            title: row.get("title")?,
            artist_id: row.get("artist_id")?,
            release_year: row.get::<_, Option<i64>>("release_year")?.unwrap_or(0),
            release_year_latched: row.get("release_year_latched")?,
            short_summary: row.get("short_summary")?,
            artwork_mrl: row.get("artwork_mrl")?,
            nb_tracks: row.get::<_, Option<i64>>("nb_tracks")?.unwrap_or(0),
            duration: row.get::<_, Option<i64>>("duration")?.unwrap_or(0),
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
        &cache.albums
    }
}

impl Album {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Album (
                id_album INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT COLLATE NOCASE,
                artist_id UNSIGNED INTEGER,
                release_year UNSIGNED INTEGER NOT NULL DEFAULT 0,
                release_year_latched BOOLEAN NOT NULL DEFAULT 0,
                short_summary TEXT,
                artwork_mrl TEXT,
                nb_tracks UNSIGNED INTEGER NOT NULL DEFAULT 0,
                duration INTEGER NOT NULL DEFAULT 0,
                is_present BOOLEAN NOT NULL DEFAULT 1,
                FOREIGN KEY (artist_id) REFERENCES Artist(id_artist) ON DELETE CASCADE
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS AlbumFts USING FTS4(title);",
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS add_album_track
             AFTER INSERT ON AlbumTrack
             BEGIN
                UPDATE Album SET
                    nb_tracks = nb_tracks + 1,
                    duration = duration + MAX(IFNULL(
                        (SELECT duration FROM Media WHERE id_media = new.media_id), 0), 0)
                    WHERE id_album = new.album_id;
             END;
             CREATE TRIGGER IF NOT EXISTS delete_album_track
             AFTER DELETE ON AlbumTrack
             BEGIN
                UPDATE Album SET nb_tracks = nb_tracks - 1
                    WHERE id_album = old.album_id;
                DELETE FROM Album
                    WHERE id_album = old.album_id AND nb_tracks = 0;
             END;
             CREATE TRIGGER IF NOT EXISTS is_album_present
             AFTER UPDATE OF is_present ON AlbumTrack
             BEGIN
                UPDATE Album SET is_present =
                    (SELECT EXISTS(
                        SELECT id_track FROM AlbumTrack
                            WHERE album_id = new.album_id AND is_present != 0))
                    WHERE id_album = new.album_id;
             END;
             CREATE TRIGGER IF NOT EXISTS insert_album_fts
             AFTER INSERT ON Album
             WHEN new.title IS NOT NULL
             BEGIN
                INSERT INTO AlbumFts(rowid, title) VALUES(new.id_album, new.title);
             END;
             CREATE TRIGGER IF NOT EXISTS delete_album_fts
             BEFORE DELETE ON Album
             WHEN old.title IS NOT NULL
             BEGIN
                DELETE FROM AlbumFts WHERE rowid = old.id_album;
             END;",
        )?;
        Ok(())
    }

    pub fn create(core: &Core, title: &str, artwork_mrl: Option<&str>) -> Result<AlbumPtr> {
        let record = Album {
            id: 0,
            title: Some(title.to_string()),
            artist_id: None,
            release_year: 0,
            release_year_latched: false,
            short_summary: None,
            artwork_mrl: artwork_mrl.map(str::to_string),
            nb_tracks: 0,
            duration: 0,
            is_present: true,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Album(title, artwork_mrl) VALUES(?, ?)",
            params![title, artwork_mrl],
        )
    }

    /// The artist's title-less album. At most one exists per artist.
    pub fn create_unknown(core: &Core, artist_id: i64) -> Result<AlbumPtr> {
        let record = Album {
            id: 0,
            title: None,
            artist_id: Some(artist_id),
            release_year: 0,
            release_year_latched: false,
            short_summary: None,
            artwork_mrl: None,
            nb_tracks: 0,
            duration: 0,
            is_present: true,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Album(artist_id) VALUES(?)",
            params![artist_id],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<AlbumPtr>> {
        entity::fetch(core, id)
    }

    pub fn unknown_album_of(core: &Core, artist_id: i64) -> Result<Option<AlbumPtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM Album WHERE artist_id = ? AND title IS NULL",
            [artist_id],
        )
    }

    /// Candidate album for a (title, album artist) pair during metadata
    /// resolution.
    pub fn from_title_and_artist(
        core: &Core,
        title: &str,
        artist_id: Option<i64>,
    ) -> Result<Option<AlbumPtr>> {
        match artist_id {
            Some(artist_id) => entity::fetch_one(
                core,
                "SELECT * FROM Album WHERE title = ? AND artist_id = ?",
                params![title, artist_id],
            ),
            None => entity::fetch_one(core, "SELECT * FROM Album WHERE title = ?", [title]),
        }
    }

    fn sort_clause(sort: SortingCriteria, desc: bool) -> String {
        let dir = if desc { " DESC" } else { "" };
        match sort {
            SortingCriteria::ReleaseDate => format!("release_year{}, title", dir),
            SortingCriteria::Duration => format!("duration{}, title", dir),
            _ => format!("title{}", dir),
        }
    }

    /// All regular albums (unknown albums excluded) with at least one
    /// present track.
    pub fn list_all(core: &Core, sort: SortingCriteria, desc: bool) -> Result<Vec<AlbumPtr>> {
        let sql = format!(
            "SELECT * FROM Album
             WHERE title IS NOT NULL AND is_present != 0
             ORDER BY {}",
            Self::sort_clause(sort, desc)
        );
        entity::fetch_all(core, &sql, [])
    }

    pub fn search(core: &Core, pattern: &str) -> Result<Vec<AlbumPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Album
             WHERE id_album IN (SELECT rowid FROM AlbumFts WHERE AlbumFts MATCH ?)
             AND is_present != 0",
            [fts_prefix_query(pattern)],
        )
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM Album", [])?;
        core.cache.albums.clear();
        Ok(())
    }

    /// Present tracks of this album, in disc / track order, optionally
    /// restricted to a genre.
    pub fn tracks(&self, core: &Core, genre_id: Option<i64>) -> Result<Vec<MediaPtr>> {
        let mut sql = String::from(
            "SELECT med.* FROM Media med
             INNER JOIN AlbumTrack att ON att.media_id = med.id_media
             WHERE att.album_id = ? AND med.is_present != 0",
        );
        if genre_id.is_some() {
            sql.push_str(" AND att.genre_id = ?");
        }
        sql.push_str(" ORDER BY att.disc_number, att.track_number, med.title");
        match genre_id {
            Some(genre_id) => entity::fetch_all(core, &sql, params![self.id, genre_id]),
            None => entity::fetch_all(core, &sql, [self.id]),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn artist_id(&self) -> Option<i64> {
        self.artist_id
    }

    pub fn release_year(&self) -> i64 {
        self.release_year
    }

    pub fn artwork_mrl(&self) -> Option<&str> {
        self.artwork_mrl.as_deref()
    }

    pub fn short_summary(&self) -> Option<&str> {
        self.short_summary.as_deref()
    }

    pub fn nb_tracks(&self) -> i64 {
        self.nb_tracks
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    /// Merge a release year coming from one of the album's tracks.
    ///
    /// Conflicting non-forced years reset the album year to 0 and latch it
    /// there, so later tracks cannot reintroduce a wrong value; a forced
    /// year always wins and clears the latch.
    pub fn set_release_year(&mut self, core: &Core, year: i64, force: bool) -> Result<()> {
        let (new_year, new_latch) = if force {
            (year, false)
        } else if year == self.release_year {
            return Ok(());
        } else if self.release_year == 0 && !self.release_year_latched {
            (year, false)
        } else {
            (0, true)
        };
        core.db.writer().execute(
            "UPDATE Album SET release_year = ?, release_year_latched = ? WHERE id_album = ?",
            params![new_year, new_latch, self.id],
        )?;
        self.release_year = new_year;
        self.release_year_latched = new_latch;
        Ok(())
    }

    /// Assign the album artist, keeping both artists' album counters in
    /// step.
    pub fn set_album_artist(&mut self, core: &Core, artist: &ArtistPtr) -> Result<bool> {
        let artist_id = artist.read().id();
        if self.artist_id == Some(artist_id) {
            return Ok(true);
        }
        let previous = self.artist_id;
        core.db.writer().execute(
            "UPDATE Album SET artist_id = ? WHERE id_album = ?",
            params![artist_id, self.id],
        )?;
        self.artist_id = Some(artist_id);
        if let Some(previous) = previous {
            Artist::update_nb_albums(core, previous, -1)?;
        }
        Artist::update_nb_albums(core, artist_id, 1)?;
        Ok(true)
    }

    pub(crate) fn mirror_track_added(&mut self, duration: i64) {
        self.nb_tracks += 1;
        self.duration += duration;
    }

    pub fn set_artwork_mrl(&mut self, core: &Core, mrl: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Album SET artwork_mrl = ? WHERE id_album = ?",
            params![mrl, self.id],
        )?;
        self.artwork_mrl = Some(mrl.to_string());
        Ok(())
    }

    pub fn set_short_summary(&mut self, core: &Core, summary: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Album SET short_summary = ? WHERE id_album = ?",
            params![summary, self.id],
        )?;
        self.short_summary = Some(summary.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::album_track::AlbumTrack;
    use crate::model::media::MediaPtr;
    use crate::model::SortingCriteria;
    use crate::test_utils::TestLibrary;

    fn add_track(
        t: &TestLibrary,
        album: &AlbumPtr,
        artist: Option<&ArtistPtr>,
        name: &str,
        track_number: i64,
        disc_number: i64,
    ) -> (MediaPtr, crate::model::album_track::AlbumTrackPtr) {
        let media = t.add_audio_media(name);
        let track = AlbumTrack::create(
            t.core(),
            &media,
            album,
            artist,
            None,
            track_number,
            disc_number,
        )
        .unwrap();
        (media, track)
    }

    #[test]
    fn create_and_fetch_returns_the_same_instance() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "album", None).unwrap();
        let album_id = album.read().id();
        let fetched = Album::fetch(t.core(), album_id).unwrap().unwrap();
        assert!(std::sync::Arc::ptr_eq(&album, &fetched));
        assert_eq!(fetched.read().title(), Some("album"));
    }

    #[test]
    fn fetch_after_cache_clear_yields_equal_values() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "album", None).unwrap();
        let album_id = album.read().id();
        t.ml.clear_cache();
        let reloaded = Album::fetch(t.core(), album_id).unwrap().unwrap();
        assert!(!std::sync::Arc::ptr_eq(&album, &reloaded));
        assert_eq!(reloaded.read().id(), album_id);
        assert_eq!(reloaded.read().title(), Some("album"));
    }

    #[test]
    fn conflicting_release_years_latch_to_zero() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "a", None).unwrap();
        let mut album = album.write();
        album.set_release_year(t.core(), 1234, false).unwrap();
        assert_eq!(album.release_year(), 1234);
        album.set_release_year(t.core(), 4321, false).unwrap();
        assert_eq!(album.release_year(), 0);
        album.set_release_year(t.core(), 666, false).unwrap();
        assert_eq!(album.release_year(), 0);
        album.set_release_year(t.core(), 9876, true).unwrap();
        assert_eq!(album.release_year(), 9876);
    }

    #[test]
    fn forced_release_year_is_idempotent() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "a", None).unwrap();
        let mut album = album.write();
        album.set_release_year(t.core(), 2000, true).unwrap();
        album.set_release_year(t.core(), 2000, true).unwrap();
        assert_eq!(album.release_year(), 2000);
    }

    #[test]
    fn nb_tracks_follows_the_track_rows() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "albumtag", None).unwrap();
        for i in 1..=10i64 {
            add_track(&t, &album, None, &format!("track{}.mp3", i), i, 1);
        }
        assert_eq!(album.read().nb_tracks(), 10);
        assert_eq!(album.read().tracks(t.core(), None).unwrap().len(), 10);

        t.ml.clear_cache();
        let album_id = album.read().id();
        let reloaded = Album::fetch(t.core(), album_id).unwrap().unwrap();
        assert_eq!(reloaded.read().nb_tracks(), 10);
    }

    #[test]
    fn deleting_the_last_track_deletes_the_album() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "short lived", None).unwrap();
        let album_id = album.read().id();
        let (_media, track) = add_track(&t, &album, None, "only.mp3", 1, 1);
        let track_id = track.read().id();
        assert!(AlbumTrack::destroy(t.core(), track_id).unwrap());
        assert!(Album::fetch(t.core(), album_id).unwrap().is_none());
    }

    #[test]
    fn deleting_the_media_cascades_to_the_album() {
        let t = TestLibrary::new();
        let album = Album::create(t.core(), "cascade", None).unwrap();
        let album_id = album.read().id();
        let (media, _track) = add_track(&t, &album, None, "single.mp3", 1, 1);
        let media_id = media.read().id();
        assert!(crate::model::media::Media::destroy(t.core(), media_id).unwrap());
        t.ml.clear_cache();
        assert!(Album::fetch(t.core(), album_id).unwrap().is_none());
    }

    #[test]
    fn unknown_album_is_stable_and_not_searchable() {
        let t = TestLibrary::new();
        let artist = Artist::create(t.core(), "Explotters in the sky").unwrap();
        let unknown = artist.read().unknown_album(t.core()).unwrap();
        let again = artist.read().unknown_album(t.core()).unwrap();
        assert_eq!(unknown.read().id(), again.read().id());

        t.ml.clear_cache();
        let reloaded = Artist::by_name(t.core(), "Explotters in the sky")
            .unwrap()
            .unwrap();
        let after_reload = reloaded.read().unknown_album(t.core()).unwrap();
        assert_eq!(after_reload.read().id(), unknown.read().id());

        // Title-less albums never enter the full-text index.
        assert!(Album::search(t.core(), "Explotters").unwrap().is_empty());
        // And they are not listed either.
        assert!(Album::list_all(t.core(), SortingCriteria::Default, false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn listing_sorts_by_title_with_ties_on_release_year() {
        let t = TestLibrary::new();
        for (title, year) in [("bbb", 2001), ("aaa", 2010), ("ccc", 1995)] {
            let album = Album::create(t.core(), title, None).unwrap();
            add_track(&t, &album, None, &format!("{}.mp3", title), 1, 1);
            album.write().set_release_year(t.core(), year, true).unwrap();
        }
        let by_title: Vec<_> = Album::list_all(t.core(), SortingCriteria::Default, false)
            .unwrap()
            .iter()
            .map(|a| a.read().title().unwrap().to_string())
            .collect();
        assert_eq!(by_title, vec!["aaa", "bbb", "ccc"]);

        let by_year: Vec<_> = Album::list_all(t.core(), SortingCriteria::ReleaseDate, true)
            .unwrap()
            .iter()
            .map(|a| a.read().release_year())
            .collect();
        assert_eq!(by_year, vec![2010, 2001, 1995]);
    }
}

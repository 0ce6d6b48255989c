//! Playlists: user-created or backed by a playlist file found during
//! discovery.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::media::MediaPtr;
use crate::model::{fts_prefix_query, SortingCriteria};
use crate::utils::clock;

pub type PlaylistPtr = EntityPtr<Playlist>;

#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    id: i64,
    name: String,
    file_id: Option<i64>,
    creation_date: i64,
}

impl DatabaseEntity for Playlist {
    const TABLE: &'static str = "Playlist";
    const PRIMARY_KEY: &'static str = "id_playlist";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_playlist")?,
            name: row.get("name")?,
            file_id: row.get("file_id")?,
            creation_date: row.get("creation_date")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.playlists
    }
}

impl Playlist {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Playlist (
                id_playlist INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE,
                file_id UNSIGNED INT DEFAULT NULL,
                creation_date UNSIGNED INT NOT NULL,
                FOREIGN KEY (file_id) REFERENCES File(id_file) ON DELETE CASCADE
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS PlaylistFts USING FTS4(name);
            CREATE TABLE IF NOT EXISTS PlaylistMediaRelation (
                media_id INTEGER,
                playlist_id INTEGER,
                position INTEGER,
                PRIMARY KEY (media_id, playlist_id),
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE,
                FOREIGN KEY (playlist_id) REFERENCES Playlist(id_playlist) ON DELETE CASCADE
            )",
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS insert_playlist_fts
             AFTER INSERT ON Playlist
             WHEN new.name IS NOT NULL
             BEGIN
                INSERT INTO PlaylistFts(rowid, name) VALUES(new.id_playlist, new.name);
             END;
             CREATE TRIGGER IF NOT EXISTS update_playlist_fts
             AFTER UPDATE OF name ON Playlist
             BEGIN
                DELETE FROM PlaylistFts WHERE rowid = old.id_playlist;
                INSERT INTO PlaylistFts(rowid, name)
                    SELECT new.id_playlist, new.name WHERE new.name IS NOT NULL;
             END;
             CREATE TRIGGER IF NOT EXISTS delete_playlist_fts
             BEFORE DELETE ON Playlist
             WHEN old.name IS NOT NULL
             BEGIN
                DELETE FROM PlaylistFts WHERE rowid = old.id_playlist;
             END;",
        )?;
        Ok(())
    }

    pub fn create(core: &Core, name: &str) -> Result<PlaylistPtr> {
        let now = clock::unix_now();
        let record = Playlist {
            id: 0,
            name: name.to_string(),
            file_id: None,
            creation_date: now,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Playlist(name, creation_date) VALUES(?, ?)",
            params![name, now],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<PlaylistPtr>> {
        entity::fetch(core, id)
    }

    pub fn list_all(core: &Core, _sort: SortingCriteria, desc: bool) -> Result<Vec<PlaylistPtr>> {
        let dir = if desc { " DESC" } else { "" };
        let sql = format!("SELECT * FROM Playlist ORDER BY name{}", dir);
        entity::fetch_all(core, &sql, [])
    }

    pub fn search(core: &Core, pattern: &str) -> Result<Vec<PlaylistPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Playlist
             WHERE id_playlist IN (SELECT rowid FROM PlaylistFts WHERE PlaylistFts MATCH ?)",
            [fts_prefix_query(pattern)],
        )
    }

    pub fn destroy(core: &Core, id: i64) -> Result<bool> {
        entity::destroy::<Playlist>(core, id)
    }

    /// Drop every file-backed playlist; they are rebuilt by the next scan.
    pub fn delete_file_backed(core: &Core) -> Result<()> {
        core.db
            .writer()
            .execute("DELETE FROM Playlist WHERE file_id IS NOT NULL", [])?;
        core.cache.playlists.clear();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> Option<i64> {
        self.file_id
    }

    pub fn creation_date(&self) -> i64 {
        self.creation_date
    }

    pub(crate) fn set_file(&mut self, core: &Core, file_id: i64) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Playlist SET file_id = ? WHERE id_playlist = ?",
            params![file_id, self.id],
        )?;
        self.file_id = Some(file_id);
        Ok(())
    }

    pub fn set_name(&mut self, core: &Core, name: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Playlist SET name = ? WHERE id_playlist = ?",
            params![name, self.id],
        )?;
        self.name = name.to_string();
        Ok(())
    }

    /// Append a media at the end of the playlist.
    pub fn append(&self, core: &Core, media_id: i64) -> Result<bool> {
        let next: i64 = core.db.read(|conn| {
            Ok(conn.query_row(
                "SELECT IFNULL(MAX(position) + 1, 0) FROM PlaylistMediaRelation
                 WHERE playlist_id = ?",
                [self.id],
                |row| row.get(0),
            )?)
        })?;
        self.add(core, media_id, next)
    }

    /// Insert a media at `position`, shifting what follows.
    pub fn add(&self, core: &Core, media_id: i64, position: i64) -> Result<bool> {
        core.db.transaction(|conn| {
            conn.execute(
                "UPDATE PlaylistMediaRelation SET position = position + 1
                 WHERE playlist_id = ? AND position >= ?",
                params![self.id, position],
            )?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO PlaylistMediaRelation(media_id, playlist_id, position)
                 VALUES(?, ?, ?)",
                params![media_id, self.id, position],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Move a media to a new position.
    pub fn move_media(&self, core: &Core, media_id: i64, position: i64) -> Result<bool> {
        core.db.transaction(|conn| {
            let removed = conn.execute(
                "DELETE FROM PlaylistMediaRelation
                 WHERE playlist_id = ? AND media_id = ?",
                params![self.id, media_id],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            conn.execute(
                "UPDATE PlaylistMediaRelation SET position = position + 1
                 WHERE playlist_id = ? AND position >= ?",
                params![self.id, position],
            )?;
            conn.execute(
                "INSERT INTO PlaylistMediaRelation(media_id, playlist_id, position)
                 VALUES(?, ?, ?)",
                params![media_id, self.id, position],
            )?;
            Ok(true)
        })
    }

    pub fn remove(&self, core: &Core, media_id: i64) -> Result<bool> {
        let removed = core.db.writer().execute(
            "DELETE FROM PlaylistMediaRelation WHERE playlist_id = ? AND media_id = ?",
            params![self.id, media_id],
        )?;
        Ok(removed > 0)
    }

    /// Present playlist members, in playlist order.
    pub fn media(&self, core: &Core) -> Result<Vec<MediaPtr>> {
        entity::fetch_all(
            core,
            "SELECT m.* FROM Media m
             INNER JOIN PlaylistMediaRelation r ON r.media_id = m.id_media
             WHERE r.playlist_id = ? AND m.is_present != 0
             ORDER BY r.position",
            [self.id],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestLibrary;

    fn names(t: &TestLibrary, playlist: &PlaylistPtr) -> Vec<String> {
        playlist
            .read()
            .media(t.core())
            .unwrap()
            .iter()
            .map(|m| m.read().file_name().to_string())
            .collect()
    }

    #[test]
    fn append_add_move_and_remove() {
        let t = TestLibrary::new();
        let playlist = Playlist::create(t.core(), "mix").unwrap();
        let a = t.add_audio_media("a.mp3");
        let b = t.add_audio_media("b.mp3");
        let c = t.add_audio_media("c.mp3");
        let (a_id, b_id, c_id) = (a.read().id(), b.read().id(), c.read().id());

        assert!(playlist.read().append(t.core(), a_id).unwrap());
        assert!(playlist.read().append(t.core(), b_id).unwrap());
        assert!(playlist.read().add(t.core(), c_id, 0).unwrap());
        assert_eq!(names(&t, &playlist), vec!["c.mp3", "a.mp3", "b.mp3"]);

        assert!(playlist.read().move_media(t.core(), c_id, 2).unwrap());
        assert_eq!(names(&t, &playlist), vec!["a.mp3", "c.mp3", "b.mp3"]);

        assert!(playlist.read().remove(t.core(), a_id).unwrap());
        assert_eq!(names(&t, &playlist), vec!["c.mp3", "b.mp3"]);
        assert!(!playlist.read().remove(t.core(), a_id).unwrap());
    }

    #[test]
    fn duplicate_members_are_ignored() {
        let t = TestLibrary::new();
        let playlist = Playlist::create(t.core(), "unique").unwrap();
        let media = t.add_audio_media("once.mp3");
        let media_id = media.read().id();
        assert!(playlist.read().append(t.core(), media_id).unwrap());
        assert!(!playlist.read().append(t.core(), media_id).unwrap());
        assert_eq!(names(&t, &playlist).len(), 1);
    }

    #[test]
    fn deleting_media_removes_it_from_playlists() {
        let t = TestLibrary::new();
        let playlist = Playlist::create(t.core(), "shrinking").unwrap();
        let media = t.add_audio_media("gone.mp3");
        let media_id = media.read().id();
        playlist.read().append(t.core(), media_id).unwrap();
        drop(media);
        crate::model::media::Media::destroy(t.core(), media_id).unwrap();
        assert!(names(&t, &playlist).is_empty());
    }

    #[test]
    fn user_playlists_survive_a_file_backed_purge() {
        let t = TestLibrary::new();
        Playlist::create(t.core(), "mine").unwrap();
        let backed = Playlist::create(t.core(), "from disk").unwrap();
        let (_, file) = t.add_media_at("file:///music/list.m3u", crate::model::MediaType::Unknown);
        backed
            .write()
            .set_file(t.core(), file.read().id())
            .unwrap();

        Playlist::delete_file_backed(t.core()).unwrap();
        let remaining = Playlist::list_all(t.core(), SortingCriteria::Default, false).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].read().name(), "mine");
    }
}

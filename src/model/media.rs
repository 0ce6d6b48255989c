//! Media entries: everything the library can catalog, from album tracks to
//! movies to externally added streams and p2p transport payloads.

use rusqlite::{params, Connection, Row, ToSql};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::file::{File, FilePtr};
use crate::model::label::LabelPtr;
use crate::model::{
    fts_prefix_query, FileType, MediaSubType, MediaType, SortingCriteria,
};
use crate::utils::clock;

pub type MediaPtr = EntityPtr<Media>;

#[derive(Debug, Clone, Serialize)]
pub struct Media {
    id: i64,
    media_type: MediaType,
    subtype: MediaSubType,
    duration: i64,
    play_count: i64,
    last_played_date: Option<i64>,
    insertion_date: i64,
    release_date: Option<i64>,
    thumbnail: Option<String>,
    title: String,
    filename: String,
    is_favorite: bool,
    is_present: bool,
    is_external: bool,
    is_p2p: bool,
    parent_media_id: Option<i64>,
    infohash: Option<String>,
    file_index: Option<i64>,
}

impl DatabaseEntity for Media {
    const TABLE: &'static str = "Media";
    const PRIMARY_KEY: &'static str = "id_media";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_media")?,
            media_type: MediaType::from_i64(row.get("type")?),
            subtype: MediaSubType::from_i64(row.get("subtype")?),
            duration: row.get::<_, Option<i64>>("duration")?.unwrap_or(-1),
            play_count: row.get::<_, Option<i64>>("play_count")?.unwrap_or(0),
            last_played_date: row.get("last_played_date")?,
            insertion_date: row.get("insertion_date")?,
            release_date: row.get("release_date")?,
            thumbnail: row.get("thumbnail")?,
            title: row.get("title")?,
            filename: row.get("filename")?,
            is_favorite: row.get("is_favorite")?,
            is_present: row.get("is_present")?,
            is_external: row.get("is_external")?,
            is_p2p: row.get("is_p2p")?,
            parent_media_id: row.get("parent_media_id")?,
            infohash: row.get("infohash")?,
            file_index: row.get("file_index")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.media
    }
}

impl Media {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Media (
                id_media INTEGER PRIMARY KEY AUTOINCREMENT,
                type INTEGER,
                subtype INTEGER NOT NULL DEFAULT 0,
                duration INTEGER DEFAULT -1,
                play_count UNSIGNED INTEGER NOT NULL DEFAULT 0,
                last_played_date UNSIGNED INTEGER,
                insertion_date UNSIGNED INTEGER,
                release_date UNSIGNED INTEGER,
                thumbnail TEXT,
                title TEXT COLLATE NOCASE,
                filename TEXT,
                is_favorite BOOLEAN NOT NULL DEFAULT 0,
                is_present BOOLEAN NOT NULL DEFAULT 1,
                is_external BOOLEAN NOT NULL DEFAULT 0,
                is_p2p BOOLEAN NOT NULL DEFAULT 0,
                parent_media_id UNSIGNED INTEGER,
                infohash TEXT,
                file_index UNSIGNED INTEGER
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS MediaFts USING FTS4(title);",
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS has_files_present
             AFTER UPDATE OF is_present ON File
             WHEN new.media_id IS NOT NULL
             BEGIN
                UPDATE Media SET is_present =
                    (SELECT EXISTS(
                        SELECT id_file FROM File
                            WHERE media_id = new.media_id
                            AND type = 0 AND is_present != 0))
                    WHERE id_media = new.media_id;
             END;
             CREATE TRIGGER IF NOT EXISTS cascade_file_deletion
             AFTER DELETE ON File
             WHEN old.media_id IS NOT NULL
             BEGIN
                DELETE FROM Media
                    WHERE id_media = old.media_id
                    AND (SELECT COUNT(id_file) FROM File
                            WHERE media_id = old.media_id) = 0;
             END;
             CREATE TRIGGER IF NOT EXISTS insert_media_fts
             AFTER INSERT ON Media
             WHEN new.title IS NOT NULL
             BEGIN
                INSERT INTO MediaFts(rowid, title) VALUES(new.id_media, new.title);
             END;
             CREATE TRIGGER IF NOT EXISTS update_media_title_fts
             AFTER UPDATE OF title ON Media
             BEGIN
                DELETE FROM MediaFts WHERE rowid = old.id_media;
                INSERT INTO MediaFts(rowid, title)
                    SELECT new.id_media, new.title WHERE new.title IS NOT NULL;
             END;
             CREATE TRIGGER IF NOT EXISTS delete_media_fts
             BEFORE DELETE ON Media
             WHEN old.title IS NOT NULL
             BEGIN
                DELETE FROM MediaFts WHERE rowid = old.id_media;
             END;
             CREATE INDEX IF NOT EXISTS media_infohash_idx ON Media(infohash);
             CREATE INDEX IF NOT EXISTS media_parent_idx ON Media(parent_media_id);",
        )?;
        Ok(())
    }

    pub fn create(core: &Core, media_type: MediaType, title: &str) -> Result<MediaPtr> {
        let now = clock::unix_now();
        let record = Media {
            id: 0,
            media_type,
            subtype: MediaSubType::Unknown,
            duration: -1,
            play_count: 0,
            last_played_date: None,
            insertion_date: now,
            release_date: None,
            thumbnail: None,
            title: title.to_string(),
            filename: title.to_string(),
            is_favorite: false,
            is_present: true,
            is_external: media_type == MediaType::External,
            is_p2p: false,
            parent_media_id: None,
            infohash: None,
            file_index: None,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Media(type, insertion_date, title, filename, is_external)
             VALUES(?, ?, ?, ?, ?)",
            params![
                media_type.to_i64(),
                now,
                title,
                title,
                media_type == MediaType::External
            ],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<MediaPtr>> {
        entity::fetch(core, id)
    }

    /// Attach an out-of-tree MRL as a file of this media.
    pub fn add_external_mrl(
        core: &Core,
        media_id: i64,
        mrl: &str,
        file_type: FileType,
    ) -> Result<Option<FilePtr>> {
        File::create_external(core, media_id, file_type, mrl)
    }

    pub fn files(&self, core: &Core) -> Result<Vec<FilePtr>> {
        entity::fetch_all(core, "SELECT * FROM File WHERE media_id = ?", [self.id])
    }

    fn listing_sort_clause(sort: SortingCriteria, desc: bool) -> String {
        let dir = if desc { " DESC" } else { "" };
        match sort {
            SortingCriteria::Duration => format!("duration{}, title", dir),
            SortingCriteria::InsertionDate => format!("insertion_date{}, title", dir),
            SortingCriteria::ReleaseDate => format!("release_date{}, title", dir),
            SortingCriteria::PlayCount => format!("play_count{}, title", dir),
            SortingCriteria::Filename => format!("filename{}, title", dir),
            _ => format!("title{}", dir),
        }
    }

    fn list_by_type(
        core: &Core,
        media_type: MediaType,
        p2p: Option<bool>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Result<Vec<MediaPtr>> {
        let mut sql = String::from("SELECT * FROM Media WHERE type = ? AND is_present != 0");
        let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(media_type.to_i64())];
        if let Some(p2p) = p2p {
            sql.push_str(" AND is_p2p = ?");
            bound.push(Box::new(p2p));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&Self::listing_sort_clause(sort, desc));
        let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        entity::fetch_all(core, &sql, refs.as_slice())
    }

    pub fn list_audio(
        core: &Core,
        p2p: Option<bool>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Result<Vec<MediaPtr>> {
        Self::list_by_type(core, MediaType::Audio, p2p, sort, desc)
    }

    pub fn list_video(
        core: &Core,
        p2p: Option<bool>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Result<Vec<MediaPtr>> {
        Self::list_by_type(core, MediaType::Video, p2p, sort, desc)
    }

    pub fn search(core: &Core, pattern: &str) -> Result<Vec<MediaPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Media
             WHERE id_media IN (SELECT rowid FROM MediaFts WHERE MediaFts MATCH ?)
             AND is_present != 0",
            [fts_prefix_query(pattern)],
        )
    }

    /// Media sorted by most recent playback, for the history endpoint.
    pub fn fetch_history(core: &Core) -> Result<Vec<MediaPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Media WHERE last_played_date IS NOT NULL
             ORDER BY last_played_date DESC",
            [],
        )
    }

    pub fn clear_history(core: &Core) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Media SET play_count = 0, last_played_date = NULL
             WHERE last_played_date IS NOT NULL",
            [],
        )?;
        // Cached instances must observe the reset as well.
        core.cache.media.clear();
        Ok(())
    }

    pub fn destroy(core: &Core, id: i64) -> Result<bool> {
        entity::destroy::<Media>(core, id)
    }

    pub fn find_by_infohash(
        core: &Core,
        infohash: &str,
        file_index: Option<i64>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Result<Vec<MediaPtr>> {
        let mut sql = String::from("SELECT * FROM Media WHERE infohash = ?");
        let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(infohash.to_string())];
        if let Some(index) = file_index {
            sql.push_str(" AND file_index = ?");
            bound.push(Box::new(index));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&Self::listing_sort_clause(sort, desc));
        let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        entity::fetch_all(core, &sql, refs.as_slice())
    }

    pub fn find_by_parent(
        core: &Core,
        parent_id: i64,
        sort: SortingCriteria,
        desc: bool,
    ) -> Result<Vec<MediaPtr>> {
        let sql = format!(
            "SELECT * FROM Media WHERE parent_media_id = ? ORDER BY {}",
            Self::listing_sort_clause(sort, desc)
        );
        entity::fetch_all(core, &sql, [parent_id])
    }

    /// Media sharing an `(infohash, file_index)` pair with at least one
    /// other entry.
    pub fn find_duplicates_by_infohash(core: &Core) -> Result<Vec<MediaPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Media
             WHERE infohash IS NOT NULL
             AND (infohash, IFNULL(file_index, -1)) IN
                (SELECT infohash, IFNULL(file_index, -1) FROM Media
                    WHERE infohash IS NOT NULL
                    GROUP BY infohash, IFNULL(file_index, -1)
                    HAVING COUNT(id_media) > 1)
             ORDER BY infohash, file_index, id_media",
            [],
        )
    }

    /// Copy user-visible metadata from one media to another; used when a
    /// p2p duplicate replaces a previously parsed entry.
    pub fn copy_metadata(core: &Core, source_id: i64, dest_id: i64) -> Result<bool> {
        let source = match Self::fetch(core, source_id)? {
            Some(m) => m,
            None => return Ok(false),
        };
        let dest = match Self::fetch(core, dest_id)? {
            Some(m) => m,
            None => return Ok(false),
        };
        let src = source.read().clone();
        core.db.writer().execute(
            "UPDATE Media SET title = ?, duration = ?, thumbnail = ?, release_date = ?,
                              type = ?, subtype = ?, play_count = ?
             WHERE id_media = ?",
            params![
                src.title,
                src.duration,
                src.thumbnail,
                src.release_date,
                src.media_type.to_i64(),
                src.subtype.to_i64(),
                src.play_count,
                dest_id
            ],
        )?;
        let mut dst = dest.write();
        dst.title = src.title;
        dst.duration = src.duration;
        dst.thumbnail = src.thumbnail;
        dst.release_date = src.release_date;
        dst.media_type = src.media_type;
        dst.subtype = src.subtype;
        dst.play_count = src.play_count;
        Ok(true)
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn subtype(&self) -> MediaSubType {
        self.subtype
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn file_name(&self) -> &str {
        &self.filename
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn play_count(&self) -> i64 {
        self.play_count
    }

    pub fn last_played_date(&self) -> Option<i64> {
        self.last_played_date
    }

    pub fn insertion_date(&self) -> i64 {
        self.insertion_date
    }

    pub fn release_date(&self) -> Option<i64> {
        self.release_date
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    pub fn is_favorite(&self) -> bool {
        self.is_favorite
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn is_p2p(&self) -> bool {
        self.is_p2p
    }

    pub fn parent_media_id(&self) -> Option<i64> {
        self.parent_media_id
    }

    pub fn infohash(&self) -> Option<&str> {
        self.infohash.as_deref()
    }

    pub fn file_index(&self) -> Option<i64> {
        self.file_index
    }

    fn update_column<V: ToSql>(&self, core: &Core, column: &str, value: &V) -> Result<()> {
        let sql = format!("UPDATE Media SET {} = ? WHERE id_media = ?", column);
        core.db.writer().execute(&sql, params![value, self.id])?;
        Ok(())
    }

    pub fn set_title(&mut self, core: &Core, title: &str) -> Result<()> {
        if self.title == title {
            return Ok(());
        }
        self.update_column(core, "title", &title)?;
        self.title = title.to_string();
        Ok(())
    }

    pub fn set_type(&mut self, core: &Core, media_type: MediaType) -> Result<()> {
        if self.media_type == media_type {
            return Ok(());
        }
        self.update_column(core, "type", &media_type.to_i64())?;
        self.media_type = media_type;
        Ok(())
    }

    pub fn set_subtype(&mut self, core: &Core, subtype: MediaSubType) -> Result<()> {
        if self.subtype == subtype {
            return Ok(());
        }
        self.update_column(core, "subtype", &subtype.to_i64())?;
        self.subtype = subtype;
        Ok(())
    }

    pub fn set_duration(&mut self, core: &Core, duration: i64) -> Result<()> {
        if self.duration == duration {
            return Ok(());
        }
        self.update_column(core, "duration", &duration)?;
        self.duration = duration;
        Ok(())
    }

    pub fn set_release_date(&mut self, core: &Core, date: i64) -> Result<()> {
        self.update_column(core, "release_date", &date)?;
        self.release_date = Some(date);
        Ok(())
    }

    pub fn set_thumbnail(&mut self, core: &Core, mrl: &str) -> Result<()> {
        self.update_column(core, "thumbnail", &mrl)?;
        self.thumbnail = Some(mrl.to_string());
        Ok(())
    }

    pub fn set_favorite(&mut self, core: &Core, favorite: bool) -> Result<()> {
        if self.is_favorite == favorite {
            return Ok(());
        }
        self.update_column(core, "is_favorite", &favorite)?;
        self.is_favorite = favorite;
        Ok(())
    }

    pub fn set_parent_media(&mut self, core: &Core, parent_id: i64) -> Result<()> {
        self.update_column(core, "parent_media_id", &parent_id)?;
        self.parent_media_id = Some(parent_id);
        Ok(())
    }

    pub fn set_p2p(&mut self, core: &Core, p2p: bool) -> Result<()> {
        if self.is_p2p == p2p {
            return Ok(());
        }
        self.update_column(core, "is_p2p", &p2p)?;
        self.is_p2p = p2p;
        Ok(())
    }

    pub fn set_infohash(&mut self, core: &Core, infohash: &str) -> Result<()> {
        self.update_column(core, "infohash", &infohash)?;
        self.infohash = Some(infohash.to_string());
        Ok(())
    }

    pub fn set_file_index(&mut self, core: &Core, index: i64) -> Result<()> {
        self.update_column(core, "file_index", &index)?;
        self.file_index = Some(index);
        Ok(())
    }

    pub fn increase_play_count(&mut self, core: &Core) -> Result<()> {
        let now = clock::unix_now();
        core.db.writer().execute(
            "UPDATE Media SET play_count = play_count + 1, last_played_date = ?
             WHERE id_media = ?",
            params![now, self.id],
        )?;
        self.play_count += 1;
        self.last_played_date = Some(now);
        Ok(())
    }

    pub fn add_label(&self, core: &Core, label: &LabelPtr) -> Result<bool> {
        let label_id = label.read().id();
        let res = core.db.writer().execute(
            "INSERT OR IGNORE INTO MediaLabelRelation(label_id, media_id) VALUES(?, ?)",
            params![label_id, self.id],
        )?;
        Ok(res > 0)
    }

    pub fn remove_label(&self, core: &Core, label: &LabelPtr) -> Result<bool> {
        let label_id = label.read().id();
        let res = core.db.writer().execute(
            "DELETE FROM MediaLabelRelation WHERE label_id = ? AND media_id = ?",
            params![label_id, self.id],
        )?;
        Ok(res > 0)
    }

    pub fn labels(&self, core: &Core) -> Result<Vec<LabelPtr>> {
        entity::fetch_all(
            core,
            "SELECT l.* FROM Label l
             INNER JOIN MediaLabelRelation r ON r.label_id = l.id_label
             WHERE r.media_id = ? ORDER BY l.id_label",
            [self.id],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestLibrary;

    #[test]
    fn fetch_twice_returns_the_live_instance() {
        let t = TestLibrary::new();
        let media = t.add_audio_media("cached.mp3");
        let media_id = media.read().id();
        let again = Media::fetch(t.core(), media_id).unwrap().unwrap();
        assert!(std::sync::Arc::ptr_eq(&media, &again));
    }

    #[test]
    fn mutations_are_visible_after_reload() {
        let t = TestLibrary::new();
        let media = t.add_audio_media("mutated.mp3");
        let media_id = media.read().id();
        {
            let mut media = media.write();
            media.set_title(t.core(), "proper title").unwrap();
            media.set_duration(t.core(), 12345).unwrap();
            media.set_favorite(t.core(), true).unwrap();
        }
        t.ml.clear_cache();
        let reloaded = Media::fetch(t.core(), media_id).unwrap().unwrap();
        let reloaded = reloaded.read();
        assert_eq!(reloaded.title(), "proper title");
        assert_eq!(reloaded.duration(), 12345);
        assert!(reloaded.is_favorite());
        assert_eq!(reloaded.file_name(), "mutated.mp3");
    }

    #[test]
    fn play_count_tracks_history() {
        let t = TestLibrary::new();
        let media = t.add_audio_media("played.mp3");
        media.write().increase_play_count(t.core()).unwrap();
        media.write().increase_play_count(t.core()).unwrap();
        assert_eq!(media.read().play_count(), 2);
        assert!(media.read().last_played_date().is_some());

        let history = Media::fetch_history(t.core()).unwrap();
        assert_eq!(history.len(), 1);

        Media::clear_history(t.core()).unwrap();
        let media_id = media.read().id();
        drop(media);
        let reloaded = Media::fetch(t.core(), media_id).unwrap().unwrap();
        assert_eq!(reloaded.read().play_count(), 0);
        assert!(Media::fetch_history(t.core()).unwrap().is_empty());
    }

    #[test]
    fn search_matches_titles_through_updates() {
        let t = TestLibrary::new();
        let media = t.add_audio_media("obscure.mp3");
        assert_eq!(Media::search(t.core(), "obscure").unwrap().len(), 1);

        media.write().set_title(t.core(), "luminous").unwrap();
        assert!(Media::search(t.core(), "obscure").unwrap().is_empty());
        assert_eq!(Media::search(t.core(), "luminous").unwrap().len(), 1);

        let media_id = media.read().id();
        drop(media);
        Media::destroy(t.core(), media_id).unwrap();
        assert!(Media::search(t.core(), "luminous").unwrap().is_empty());
    }

    #[test]
    fn infohash_lookups() {
        let t = TestLibrary::new();
        let first = t.ml.add_p2p_media(None, MediaType::Video, "ep1", "magnet:?xt=a").unwrap();
        let second = t.ml.add_p2p_media(None, MediaType::Video, "ep2", "magnet:?xt=b").unwrap();
        {
            let mut m = first.write();
            m.set_infohash(t.core(), "beef").unwrap();
            m.set_file_index(t.core(), 0).unwrap();
        }
        {
            let mut m = second.write();
            m.set_infohash(t.core(), "beef").unwrap();
            m.set_file_index(t.core(), 1).unwrap();
        }

        let both = Media::find_by_infohash(
            t.core(),
            "beef",
            None,
            SortingCriteria::Default,
            false,
        )
        .unwrap();
        assert_eq!(both.len(), 2);
        let only = Media::find_by_infohash(
            t.core(),
            "beef",
            Some(1),
            SortingCriteria::Default,
            false,
        )
        .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].read().id(), second.read().id());

        // Distinct file indexes are not duplicates.
        assert!(Media::find_duplicates_by_infohash(t.core()).unwrap().is_empty());
        second.write().set_file_index(t.core(), 0).unwrap();
        assert_eq!(Media::find_duplicates_by_infohash(t.core()).unwrap().len(), 2);
    }

    #[test]
    fn children_are_found_by_parent() {
        let t = TestLibrary::new();
        let parent = t.ml.add_p2p_media(None, MediaType::External, "bundle", "magnet:?xt=p").unwrap();
        let parent_id = parent.read().id();
        let child = t
            .ml
            .add_p2p_media(Some(parent_id), MediaType::Video, "part", "magnet:?xt=p&i=0")
            .unwrap();
        let children =
            Media::find_by_parent(t.core(), parent_id, SortingCriteria::Default, false).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].read().id(), child.read().id());
    }

    #[test]
    fn copy_metadata_overwrites_the_destination() {
        let t = TestLibrary::new();
        let source = t.add_audio_media("source.mp3");
        {
            let mut source = source.write();
            source.set_title(t.core(), "the real one").unwrap();
            source.set_duration(t.core(), 98765).unwrap();
        }
        let dest = t.add_audio_media("dest.mp3");
        let source_id = source.read().id();
        let dest_id = dest.read().id();
        assert!(Media::copy_metadata(t.core(), source_id, dest_id).unwrap());
        assert_eq!(dest.read().title(), "the real one");
        assert_eq!(dest.read().duration(), 98765);

        assert!(!Media::copy_metadata(t.core(), source_id, 424242).unwrap());
    }
}

//! Stream playback history, bounded to the most recent entries by trigger.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::media::{Media, MediaPtr};
use crate::utils::clock;

pub type HistoryPtr = EntityPtr<History>;

/// Older entries are dropped past this count.
pub const MAX_ENTRIES: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct History {
    id: i64,
    mrl: Option<String>,
    media_id: Option<i64>,
    insertion_date: i64,
}

impl DatabaseEntity for History {
    const TABLE: &'static str = "History";
    const PRIMARY_KEY: &'static str = "id_record";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_record")?,
            mrl: row.get("mrl")?,
            media_id: row.get("media_id")?,
            insertion_date: row.get("insertion_date")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.history
    }
}

impl History {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS History (
                id_record INTEGER PRIMARY KEY AUTOINCREMENT,
                mrl TEXT,
                media_id UNSIGNED INTEGER,
                insertion_date UNSIGNED INT NOT NULL,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TRIGGER IF NOT EXISTS limit_nb_records
                 AFTER INSERT ON History
                 BEGIN
                    DELETE FROM History WHERE id_record IN
                        (SELECT id_record FROM History
                            ORDER BY insertion_date DESC, id_record DESC
                            LIMIT -1 OFFSET {});
                 END",
                MAX_ENTRIES
            ),
            [],
        )?;
        Ok(())
    }

    /// Record a media playback.
    pub fn insert_media(core: &Core, media_id: i64) -> Result<()> {
        core.db.writer().execute(
            "INSERT INTO History(media_id, insertion_date) VALUES(?, ?)",
            params![media_id, clock::unix_now()],
        )?;
        Ok(())
    }

    /// Record a raw stream MRL playback.
    pub fn insert_mrl(core: &Core, mrl: &str) -> Result<()> {
        core.db.writer().execute(
            "INSERT INTO History(mrl, insertion_date) VALUES(?, ?)",
            params![mrl, clock::unix_now()],
        )?;
        Ok(())
    }

    /// Most recent entries first.
    pub fn fetch_all(core: &Core) -> Result<Vec<HistoryPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM History ORDER BY insertion_date DESC, id_record DESC",
            [],
        )
    }

    pub fn clear_streams(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM History", [])?;
        core.cache.history.clear();
        Ok(())
    }

    pub fn mrl(&self) -> Option<&str> {
        self.mrl.as_deref()
    }

    pub fn media_id(&self) -> Option<i64> {
        self.media_id
    }

    pub fn media(&self, core: &Core) -> Result<Option<MediaPtr>> {
        match self.media_id {
            Some(id) => Media::fetch(core, id),
            None => Ok(None),
        }
    }

    pub fn insertion_date(&self) -> i64 {
        self.insertion_date
    }
}

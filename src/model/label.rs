//! User-assigned labels on media.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::media::MediaPtr;

pub type LabelPtr = EntityPtr<Label>;

#[derive(Debug, Clone, Serialize)]
pub struct Label {
    id: i64,
    name: String,
}

impl DatabaseEntity for Label {
    const TABLE: &'static str = "Label";
    const PRIMARY_KEY: &'static str = "id_label";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_label")?,
            name: row.get("name")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.labels
    }
}

impl Label {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Label (
                id_label INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE ON CONFLICT FAIL
            );
            CREATE TABLE IF NOT EXISTS MediaLabelRelation (
                label_id INTEGER,
                media_id INTEGER,
                PRIMARY KEY (label_id, media_id),
                FOREIGN KEY (label_id) REFERENCES Label(id_label) ON DELETE CASCADE,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE
            )",
        )?;
        Ok(())
    }

    pub fn create(core: &Core, name: &str) -> Result<LabelPtr> {
        let record = Label {
            id: 0,
            name: name.to_string(),
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Label(name) VALUES(?)",
            params![name],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<LabelPtr>> {
        entity::fetch(core, id)
    }

    pub fn destroy(core: &Core, id: i64) -> Result<bool> {
        entity::destroy::<Label>(core, id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Media carrying this label.
    pub fn media(&self, core: &Core) -> Result<Vec<MediaPtr>> {
        entity::fetch_all(
            core,
            "SELECT m.* FROM Media m
             INNER JOIN MediaLabelRelation r ON r.media_id = m.id_media
             WHERE r.label_id = ? ORDER BY m.title",
            [self.id],
        )
    }
}

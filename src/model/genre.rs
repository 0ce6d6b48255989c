//! Music genres, deduplicated by name.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::media::MediaPtr;
use crate::model::{fts_prefix_query, SortingCriteria};

pub type GenrePtr = EntityPtr<Genre>;

#[derive(Debug, Clone, Serialize)]
pub struct Genre {
    id: i64,
    name: String,
}

impl DatabaseEntity for Genre {
    const TABLE: &'static str = "Genre";
    const PRIMARY_KEY: &'static str = "id_genre";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_genre")?,
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
        &cache.genres
    }
}

impl Genre {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Genre (
                id_genre INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT COLLATE NOCASE UNIQUE ON CONFLICT FAIL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS GenreFts USING FTS4(name);",
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS insert_genre_fts
             AFTER INSERT ON Genre
             BEGIN
                INSERT INTO GenreFts(rowid, name) VALUES(new.id_genre, new.name);
             END;
             CREATE TRIGGER IF NOT EXISTS delete_genre_fts
             BEFORE DELETE ON Genre
             BEGIN
                DELETE FROM GenreFts WHERE rowid = old.id_genre;
             END;",
        )?;
        Ok(())
    }

    pub fn create(core: &Core, name: &str) -> Result<GenrePtr> {
        let record = Genre {
            id: 0,
            name: name.to_string(),
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Genre(name) VALUES(?)",
            params![name],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<GenrePtr>> {
        entity::fetch(core, id)
    }

    pub fn by_name(core: &Core, name: &str) -> Result<Option<GenrePtr>> {
        entity::fetch_one(core, "SELECT * FROM Genre WHERE name = ?", [name])
    }

    /// Find-or-create; the unique name constraint resolves creation races.
    pub fn from_name(core: &Core, name: &str) -> Result<GenrePtr> {
        match Self::by_name(core, name)? {
            Some(genre) => Ok(genre),
            None => match Self::create(core, name) {
                Ok(genre) => Ok(genre),
                Err(err) if err.is_constraint() => {
                    Self::by_name(core, name)?.ok_or(err)
                }
                Err(err) => Err(err),
            },
        }
    }

    pub fn list_all(core: &Core, _sort: SortingCriteria, desc: bool) -> Result<Vec<GenrePtr>> {
        let dir = if desc { " DESC" } else { "" };
        let sql = format!("SELECT * FROM Genre ORDER BY name{}", dir);
        entity::fetch_all(core, &sql, [])
    }

    pub fn search(core: &Core, pattern: &str) -> Result<Vec<GenrePtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Genre
             WHERE id_genre IN (SELECT rowid FROM GenreFts WHERE GenreFts MATCH ?)",
            [fts_prefix_query(pattern)],
        )
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM Genre", [])?;
        core.cache.genres.clear();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Present tracks tagged with this genre.
    pub fn tracks(&self, core: &Core) -> Result<Vec<MediaPtr>> {
        entity::fetch_all(
            core,
            "SELECT med.* FROM Media med
             INNER JOIN AlbumTrack att ON att.media_id = med.id_media
             WHERE att.genre_id = ? AND med.is_present != 0
             ORDER BY med.title",
            [self.id],
        )
    }
}

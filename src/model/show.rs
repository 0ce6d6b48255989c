//! TV shows and their episodes.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;

pub type ShowPtr = EntityPtr<Show>;
pub type ShowEpisodePtr = EntityPtr<ShowEpisode>;

#[derive(Debug, Clone, Serialize)]
pub struct Show {
    id: i64,
    name: String,
    release_date: Option<i64>,
    short_summary: Option<String>,
    artwork_mrl: Option<String>,
    tvdb_id: Option<String>,
}

impl DatabaseEntity for Show {
    const TABLE: &'static str = "Show";
    const PRIMARY_KEY: &'static str = "id_show";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_show")?,
            name: row.get("name")?,
            release_date: row.get("release_date")?,
            short_summary: row.get("short_summary")?,
            artwork_mrl: row.get("artwork_mrl")?,
            tvdb_id: row.get("tvdb_id")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.shows
    }
}

impl Show {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Show (
                id_show INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                release_date UNSIGNED INTEGER,
                short_summary TEXT,
                artwork_mrl TEXT,
                tvdb_id TEXT
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create(core: &Core, name: &str) -> Result<ShowPtr> {
        let record = Show {
            id: 0,
            name: name.to_string(),
            release_date: None,
            short_summary: None,
            artwork_mrl: None,
            tvdb_id: None,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Show(name) VALUES(?)",
            params![name],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<ShowPtr>> {
        entity::fetch(core, id)
    }

    pub fn by_name(core: &Core, name: &str) -> Result<Option<ShowPtr>> {
        entity::fetch_one(core, "SELECT * FROM Show WHERE name = ?", [name])
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM Show", [])?;
        core.cache.shows.clear();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release_date(&self) -> Option<i64> {
        self.release_date
    }

    pub fn short_summary(&self) -> Option<&str> {
        self.short_summary.as_deref()
    }

    pub fn artwork_mrl(&self) -> Option<&str> {
        self.artwork_mrl.as_deref()
    }

    pub fn tvdb_id(&self) -> Option<&str> {
        self.tvdb_id.as_deref()
    }

    /// Register an episode of this show.
    pub fn add_episode(
        &self,
        core: &Core,
        media_id: i64,
        title: &str,
        season_number: i64,
        episode_number: i64,
    ) -> Result<ShowEpisodePtr> {
        ShowEpisode::create(core, media_id, self.id, title, season_number, episode_number)
    }

    pub fn episodes(&self, core: &Core) -> Result<Vec<ShowEpisodePtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM ShowEpisode WHERE show_id = ?
             ORDER BY season_number, episode_number",
            [self.id],
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowEpisode {
    id: i64,
    media_id: i64,
    show_id: i64,
    episode_number: i64,
    season_number: i64,
    title: String,
    short_summary: Option<String>,
    tvdb_id: Option<String>,
}

impl DatabaseEntity for ShowEpisode {
    const TABLE: &'static str = "ShowEpisode";
    const PRIMARY_KEY: &'static str = "id_episode";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_episode")?,
            media_id: row.get("media_id")?,
            show_id: row.get("show_id")?,
            episode_number: row.get("episode_number")?,
            season_number: row.get("season_number")?,
            title: row.get("title")?,
            short_summary: row.get("short_summary")?,
            tvdb_id: row.get("tvdb_id")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.show_episodes
    }
}

impl ShowEpisode {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ShowEpisode (
                id_episode INTEGER PRIMARY KEY AUTOINCREMENT,
                media_id UNSIGNED INTEGER NOT NULL,
                show_id UNSIGNED INTEGER NOT NULL,
                episode_number UNSIGNED INTEGER,
                season_number UNSIGNED INTEGER,
                title TEXT,
                short_summary TEXT,
                tvdb_id TEXT,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE,
                FOREIGN KEY (show_id) REFERENCES Show(id_show) ON DELETE CASCADE
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create(
        core: &Core,
        media_id: i64,
        show_id: i64,
        title: &str,
        season_number: i64,
        episode_number: i64,
    ) -> Result<ShowEpisodePtr> {
        let record = ShowEpisode {
            id: 0,
            media_id,
            show_id,
            episode_number,
            season_number,
            title: title.to_string(),
            short_summary: None,
            tvdb_id: None,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO ShowEpisode(media_id, show_id, episode_number, season_number, title)
             VALUES(?, ?, ?, ?, ?)",
            params![media_id, show_id, episode_number, season_number, title],
        )
    }

    pub fn from_media(core: &Core, media_id: i64) -> Result<Option<ShowEpisodePtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM ShowEpisode WHERE media_id = ?",
            [media_id],
        )
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM ShowEpisode", [])?;
        core.cache.show_episodes.clear();
        Ok(())
    }

    pub fn media_id(&self) -> i64 {
        self.media_id
    }

    pub fn show_id(&self) -> i64 {
        self.show_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn season_number(&self) -> i64 {
        self.season_number
    }

    pub fn episode_number(&self) -> i64 {
        self.episode_number
    }
}

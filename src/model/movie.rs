//! Movies: the video-side refinement of a media entry.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;

pub type MoviePtr = EntityPtr<Movie>;

#[derive(Debug, Clone, Serialize)]
pub struct Movie {
    id: i64,
    media_id: i64,
    title: String,
    release_date: Option<i64>,
    summary: Option<String>,
    artwork_mrl: Option<String>,
    imdb_id: Option<String>,
}

impl DatabaseEntity for Movie {
    const TABLE: &'static str = "Movie";
    const PRIMARY_KEY: &'static str = "id_movie";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_movie")?,
            media_id: row.get("media_id")?,
            title: row.get("title")?,
            release_date: row.get("release_date")?,
            summary: row.get("summary")?,
            artwork_mrl: row.get("artwork_mrl")?,
            imdb_id: row.get("imdb_id")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.movies
    }
}

impl Movie {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Movie (
                id_movie INTEGER PRIMARY KEY AUTOINCREMENT,
                media_id UNSIGNED INTEGER NOT NULL,
                title TEXT UNIQUE ON CONFLICT FAIL,
                release_date UNSIGNED INTEGER,
                summary TEXT,
                artwork_mrl TEXT,
                imdb_id TEXT,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create(core: &Core, media_id: i64, title: &str) -> Result<MoviePtr> {
        let record = Movie {
            id: 0,
            media_id,
            title: title.to_string(),
            release_date: None,
            summary: None,
            artwork_mrl: None,
            imdb_id: None,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Movie(media_id, title) VALUES(?, ?)",
            params![media_id, title],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<MoviePtr>> {
        entity::fetch(core, id)
    }

    pub fn by_title(core: &Core, title: &str) -> Result<Option<MoviePtr>> {
        entity::fetch_one(core, "SELECT * FROM Movie WHERE title = ?", [title])
    }

    pub fn from_media(core: &Core, media_id: i64) -> Result<Option<MoviePtr>> {
        entity::fetch_one(core, "SELECT * FROM Movie WHERE media_id = ?", [media_id])
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM Movie", [])?;
        core.cache.movies.clear();
        Ok(())
    }

    pub fn media_id(&self) -> i64 {
        self.media_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn release_date(&self) -> Option<i64> {
        self.release_date
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn artwork_mrl(&self) -> Option<&str> {
        self.artwork_mrl.as_deref()
    }

    pub fn imdb_id(&self) -> Option<&str> {
        self.imdb_id.as_deref()
    }

    pub fn set_release_date(&mut self, core: &Core, date: i64) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Movie SET release_date = ? WHERE id_movie = ?",
            params![date, self.id],
        )?;
        self.release_date = Some(date);
        Ok(())
    }

    pub fn set_summary(&mut self, core: &Core, summary: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Movie SET summary = ? WHERE id_movie = ?",
            params![summary, self.id],
        )?;
        self.summary = Some(summary.to_string());
        Ok(())
    }

    pub fn set_artwork_mrl(&mut self, core: &Core, mrl: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Movie SET artwork_mrl = ? WHERE id_movie = ?",
            params![mrl, self.id],
        )?;
        self.artwork_mrl = Some(mrl.to_string());
        Ok(())
    }

    pub fn set_imdb_id(&mut self, core: &Core, imdb_id: &str) -> Result<()> {
        core.db.writer().execute(
            "UPDATE Movie SET imdb_id = ? WHERE id_movie = ?",
            params![imdb_id, self.id],
        )?;
        self.imdb_id = Some(imdb_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;
    use crate::test_utils::TestLibrary;

    #[test]
    fn movie_fields_round_trip() {
        let t = TestLibrary::new();
        let (media, _) = t.add_media_at("file:///videos/feature.mkv", MediaType::Video);
        let media_id = media.read().id();
        let movie = Movie::create(t.core(), media_id, "Feature").unwrap();
        {
            let mut movie = movie.write();
            movie.set_release_date(t.core(), 1234567).unwrap();
            movie.set_summary(t.core(), "two hours of walking").unwrap();
            movie.set_imdb_id(t.core(), "tt0000001").unwrap();
        }
        let movie_id = movie.read().id();
        t.ml.clear_cache();
        let reloaded = Movie::fetch(t.core(), movie_id).unwrap().unwrap();
        let reloaded = reloaded.read();
        assert_eq!(reloaded.title(), "Feature");
        assert_eq!(reloaded.release_date(), Some(1234567));
        assert_eq!(reloaded.summary(), Some("two hours of walking"));
        assert_eq!(reloaded.imdb_id(), Some("tt0000001"));
    }

    #[test]
    fn titles_are_unique() {
        let t = TestLibrary::new();
        let (media, _) = t.add_media_at("file:///videos/one.mkv", MediaType::Video);
        let media_id = media.read().id();
        Movie::create(t.core(), media_id, "Twice").unwrap();
        assert!(Movie::create(t.core(), media_id, "Twice").is_err());
        assert!(Movie::by_title(t.core(), "Twice").unwrap().is_some());
    }
}

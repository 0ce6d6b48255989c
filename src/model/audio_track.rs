//! Codec-level description of a media's audio stream, written by the probe
//! stage.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;

pub type AudioTrackPtr = EntityPtr<AudioTrack>;

#[derive(Debug, Clone, Serialize)]
pub struct AudioTrack {
    id: i64,
    codec: Option<String>,
    bitrate: i64,
    samplerate: i64,
    nb_channels: i64,
    language: Option<String>,
    description: Option<String>,
    media_id: i64,
}

impl DatabaseEntity for AudioTrack {
    const TABLE: &'static str = "AudioTrack";
    const PRIMARY_KEY: &'static str = "id_track";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_track")?,
            codec: row.get("codec")?,
            bitrate: row.get::<_, Option<i64>>("bitrate")?.unwrap_or(0),
            samplerate: row.get::<_, Option<i64>>("samplerate")?.unwrap_or(0),
            nb_channels: row.get::<_, Option<i64>>("nb_channels")?.unwrap_or(0),
            language: row.get("language")?,
            description: row.get("description")?,
            media_id: row.get("media_id")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.audio_tracks
    }
}

impl AudioTrack {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS AudioTrack (
                id_track INTEGER PRIMARY KEY AUTOINCREMENT,
                codec TEXT,
                bitrate UNSIGNED INTEGER,
                samplerate UNSIGNED INTEGER,
                nb_channels UNSIGNED INTEGER,
                language TEXT,
                description TEXT,
                media_id UNSIGNED INT,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS audio_track_media_idx ON AudioTrack(media_id);",
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        core: &Core,
        codec: Option<&str>,
        bitrate: i64,
        samplerate: i64,
        nb_channels: i64,
        language: Option<&str>,
        description: Option<&str>,
        media_id: i64,
    ) -> Result<AudioTrackPtr> {
        let record = AudioTrack {
            id: 0,
            codec: codec.map(str::to_string),
            bitrate,
            samplerate,
            nb_channels,
            language: language.map(str::to_string),
            description: description.map(str::to_string),
            media_id,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO AudioTrack(codec, bitrate, samplerate, nb_channels,
                                    language, description, media_id)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            params![codec, bitrate, samplerate, nb_channels, language, description, media_id],
        )
    }

    pub fn from_media(core: &Core, media_id: i64) -> Result<Vec<AudioTrackPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM AudioTrack WHERE media_id = ?",
            [media_id],
        )
    }

    pub fn delete_all(core: &Core) -> Result<()> {
        core.db.writer().execute("DELETE FROM AudioTrack", [])?;
        core.cache.audio_tracks.clear();
        Ok(())
    }

    pub fn codec(&self) -> Option<&str> {
        self.codec.as_deref()
    }

    pub fn bitrate(&self) -> i64 {
        self.bitrate
    }

    pub fn samplerate(&self) -> i64 {
        self.samplerate
    }

    pub fn nb_channels(&self) -> i64 {
        self.nb_channels
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn media_id(&self) -> i64 {
        self.media_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;
    use crate::test_utils::TestLibrary;

    #[test]
    fn codec_rows_follow_their_media() {
        let t = TestLibrary::new();
        let (media, _) = t.add_media_at("file:///music/lossless.flac", MediaType::Audio);
        let media_id = media.read().id();
        AudioTrack::create(
            t.core(),
            Some("flac"),
            1411,
            44100,
            2,
            None,
            None,
            media_id,
        )
        .unwrap();

        let tracks = AudioTrack::from_media(t.core(), media_id).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].read().codec(), Some("flac"));
        assert_eq!(tracks[0].read().samplerate(), 44100);

        drop(media);
        crate::model::media::Media::destroy(t.core(), media_id).unwrap();
        assert!(AudioTrack::from_media(t.core(), media_id).unwrap().is_empty());
    }
}

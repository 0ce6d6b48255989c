//! Storage devices backing the catalog.
//!
//! A device row is created the first time content is discovered on it and
//! is never deleted; known-but-absent removable storage keeps its folders
//! and media around with `is_present = 0`.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;

pub type DevicePtr = EntityPtr<Device>;

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    id: i64,
    uuid: String,
    is_removable: bool,
    is_present: bool,
}

impl DatabaseEntity for Device {
    const TABLE: &'static str = "Device";
    const PRIMARY_KEY: &'static str = "id_device";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_device")?,
            uuid: row.get("uuid")?,
            is_removable: row.get("is_removable")?,
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
        &cache.devices
    }
}

impl Device {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Device (
                id_device INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT UNIQUE ON CONFLICT FAIL,
                is_removable BOOLEAN NOT NULL,
                is_present BOOLEAN NOT NULL DEFAULT 1
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create(core: &Core, uuid: &str, is_removable: bool) -> Result<DevicePtr> {
        let record = Device {
            id: 0,
            uuid: uuid.to_string(),
            is_removable,
            is_present: true,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Device(uuid, is_removable) VALUES(?, ?)",
            params![uuid, is_removable],
        )
    }

    pub fn from_uuid(core: &Core, uuid: &str) -> Result<Option<DevicePtr>> {
        entity::fetch_one(core, "SELECT * FROM Device WHERE uuid = ?", [uuid])
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<DevicePtr>> {
        entity::fetch(core, id)
    }

    pub fn fetch_all(core: &Core) -> Result<Vec<DevicePtr>> {
        entity::fetch_all(core, "SELECT * FROM Device", [])
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_removable(&self) -> bool {
        self.is_removable
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    /// Flip presence. Folder, file, media, album and artist presence all
    /// cascade from here through triggers.
    pub fn set_present(&mut self, core: &Core, present: bool) -> Result<()> {
        if self.is_present == present {
            return Ok(());
        }
        core.db.writer().execute(
            "UPDATE Device SET is_present = ? WHERE id_device = ?",
            params![present, self.id],
        )?;
        self.is_present = present;
        // The update fans out through the trigger chain; cached instances
        // of every dependent kind would keep the old presence flag.
        core.cache.folders.clear();
        core.cache.files.clear();
        core.cache.media.clear();
        core.cache.album_tracks.clear();
        core.cache.albums.clear();
        core.cache.artists.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::album::Album;
    use crate::model::album_track::AlbumTrack;
    use crate::model::artist::Artist;
    use crate::model::media::Media;
    use crate::model::{MediaType, SortingCriteria};
    use crate::test_utils::TestLibrary;

    #[test]
    fn devices_are_created_on_first_sight_and_never_forgotten() {
        let t = TestLibrary::new();
        t.fs.add_device("usb", "file:///mnt/usb/", true);
        t.add_media_at("file:///mnt/usb/a.mp3", MediaType::Audio);
        let device = t.device("usb").unwrap();
        assert!(device.read().is_removable());
        assert!(device.read().is_present());
    }

    #[test]
    fn unplugging_a_device_hides_its_content_until_replug() {
        let t = TestLibrary::new();
        t.fs.add_device("usb", "file:///mnt/usb/", true);
        let (media, _file) = t.add_media_at("file:///mnt/usb/song.mp3", MediaType::Audio);
        let media_id = media.read().id();

        let artist = Artist::create(t.core(), "removable artist").unwrap();
        let album = Album::create(t.core(), "removable album", None).unwrap();
        album.write().set_album_artist(t.core(), &artist).unwrap();
        AlbumTrack::create(t.core(), &media, &album, Some(&artist), None, 1, 1).unwrap();
        let album_id = album.read().id();
        drop((media, album, artist));

        assert_eq!(
            Album::list_all(t.core(), SortingCriteria::Default, true)
                .unwrap()
                .len(),
            1
        );

        let device = t.device("usb").unwrap();
        device.write().set_present(t.core(), false).unwrap();

        let media = Media::fetch(t.core(), media_id).unwrap().unwrap();
        assert!(!media.read().is_present());
        assert!(Album::list_all(t.core(), SortingCriteria::Default, true)
            .unwrap()
            .is_empty());
        let album = Album::fetch(t.core(), album_id).unwrap().unwrap();
        assert!(!album.read().is_present());

        device.write().set_present(t.core(), true).unwrap();
        let media = Media::fetch(t.core(), media_id).unwrap().unwrap();
        assert!(media.read().is_present());
        assert_eq!(
            Album::list_all(t.core(), SortingCriteria::Default, true)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn unplugging_does_not_touch_other_devices() {
        let t = TestLibrary::new();
        t.fs.add_device("usb", "file:///mnt/usb/", true);
        let (local, _) = t.add_media_at("file:///music/local.mp3", MediaType::Audio);
        let (removable, _) = t.add_media_at("file:///mnt/usb/far.mp3", MediaType::Audio);
        let local_id = local.read().id();
        let removable_id = removable.read().id();
        drop((local, removable));

        let device = t.device("usb").unwrap();
        device.write().set_present(t.core(), false).unwrap();

        let local = Media::fetch(t.core(), local_id).unwrap().unwrap();
        let removable = Media::fetch(t.core(), removable_id).unwrap().unwrap();
        assert!(local.read().is_present());
        assert!(!removable.read().is_present());
    }
}

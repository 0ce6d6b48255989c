//! Folders: the catalog's view of directories under the entry points.
//!
//! Folders on removable devices store their path relative to the device
//! mountpoint, so the same stick is recognized wherever it gets mounted.
//! Root folders (entry points) have no parent. Deleting a folder cascades
//! to child folders, files and their media.

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tracing::warn;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::model::device::{Device, DevicePtr};

pub type FolderPtr = EntityPtr<Folder>;

/// Blacklist filter for folder lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannedType {
    Any,
    Banned,
    NotBanned,
}

#[derive(Debug, Clone, Serialize)]
pub struct Folder {
    id: i64,
    path: String,
    parent_id: Option<i64>,
    is_blacklisted: bool,
    device_id: i64,
    is_present: bool,
    is_removable: bool,
}

impl DatabaseEntity for Folder {
    const TABLE: &'static str = "Folder";
    const PRIMARY_KEY: &'static str = "id_folder";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_folder")?,
            path: row.get("path")?,
            parent_id: row.get("parent_id")?,
            is_blacklisted: row.get("is_blacklisted")?,
            device_id: row.get("device_id")?,
            is_present: row.get("is_present")?,
            is_removable: row.get("is_removable")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.folders
    }
}

/// A folder MRL resolved against its backing device.
pub(crate) struct DeviceLocation {
    pub device: DevicePtr,
    pub mountpoint: String,
    pub is_removable: bool,
}

impl Folder {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Folder (
                id_folder INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT,
                parent_id UNSIGNED INTEGER,
                is_blacklisted BOOLEAN NOT NULL DEFAULT 0,
                device_id UNSIGNED INTEGER,
                is_present BOOLEAN NOT NULL DEFAULT 1,
                is_removable BOOLEAN NOT NULL,
                FOREIGN KEY (parent_id) REFERENCES Folder(id_folder) ON DELETE CASCADE,
                FOREIGN KEY (device_id) REFERENCES Device(id_device) ON DELETE CASCADE,
                UNIQUE(path, device_id) ON CONFLICT FAIL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS is_device_present
             AFTER UPDATE OF is_present ON Device
             BEGIN
                UPDATE Folder SET is_present = new.is_present
                    WHERE device_id = new.id_device;
             END;
             CREATE INDEX IF NOT EXISTS folder_device_id_idx ON Folder(device_id);
             CREATE INDEX IF NOT EXISTS folder_parent_id_idx ON Folder(parent_id);",
        )?;
        Ok(())
    }

    /// Insert a folder for `mrl` under `parent_id` on `location`'s device.
    pub fn create(
        core: &Core,
        mrl: &str,
        parent_id: Option<i64>,
        location: &DeviceLocation,
    ) -> Result<FolderPtr> {
        let path = if location.is_removable {
            mrl.strip_prefix(location.mountpoint.as_str())
                .unwrap_or(mrl)
                .to_string()
        } else {
            mrl.to_string()
        };
        let device_id = location.device.read().id();
        let record = Folder {
            id: 0,
            path: path.clone(),
            parent_id,
            is_blacklisted: false,
            device_id,
            is_present: location.device.read().is_present(),
            is_removable: location.is_removable,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO Folder(path, parent_id, device_id, is_removable)
             VALUES(?, ?, ?, ?)",
            params![path, parent_id, device_id, location.is_removable],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<FolderPtr>> {
        entity::fetch(core, id)
    }

    /// Resolve `mrl` to its device through the registered fs factories,
    /// creating the device row on first sight.
    pub(crate) fn locate_device(core: &Core, mrl: &str) -> Result<Option<DeviceLocation>> {
        let factory = match core.fs_factory_for_mrl(mrl) {
            Some(f) => f,
            None => return Ok(None),
        };
        let device_fs = match factory.create_device_from_mrl(mrl) {
            Some(d) => d,
            None => {
                warn!(mrl, "no device claims this mrl");
                return Ok(None);
            }
        };
        let device = match Device::from_uuid(core, device_fs.uuid())? {
            Some(d) => d,
            None => match Device::create(core, device_fs.uuid(), device_fs.is_removable()) {
                Ok(d) => d,
                Err(err) if err.is_constraint() => Device::from_uuid(core, device_fs.uuid())?
                    .ok_or(err)?,
                Err(err) => return Err(err),
            },
        };
        Ok(Some(DeviceLocation {
            device,
            mountpoint: device_fs.mountpoint(),
            is_removable: device_fs.is_removable(),
        }))
    }

    /// Find the folder row matching an MRL, honouring the blacklist filter.
    pub fn from_mrl(core: &Core, mrl: &str, banned: BannedType) -> Result<Option<FolderPtr>> {
        let location = match Self::locate_device(core, mrl)? {
            Some(l) => l,
            None => return Ok(None),
        };
        let path = if location.is_removable {
            mrl.strip_prefix(location.mountpoint.as_str())
                .unwrap_or(mrl)
                .to_string()
        } else {
            mrl.to_string()
        };
        let filter = match banned {
            BannedType::Any => "",
            BannedType::Banned => " AND is_blacklisted = 1",
            BannedType::NotBanned => " AND is_blacklisted = 0",
        };
        let sql = format!(
            "SELECT * FROM Folder WHERE path = ? AND device_id = ?{}",
            filter
        );
        let device_id = location.device.read().id();
        entity::fetch_one(core, &sql, params![path, device_id])
    }

    /// Root folders (entry points), banned ones excluded.
    pub fn entry_points(core: &Core) -> Result<Vec<FolderPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Folder WHERE parent_id IS NULL AND is_blacklisted = 0",
            [],
        )
    }

    /// Direct sub-folders, banned ones excluded.
    pub fn children(core: &Core, parent_id: i64) -> Result<Vec<FolderPtr>> {
        entity::fetch_all(
            core,
            "SELECT * FROM Folder WHERE parent_id = ? AND is_blacklisted = 0",
            [parent_id],
        )
    }

    pub fn destroy(core: &Core, id: i64) -> Result<bool> {
        entity::destroy::<Folder>(core, id)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    pub fn is_blacklisted(&self) -> bool {
        self.is_blacklisted
    }

    pub fn is_removable(&self) -> bool {
        self.is_removable
    }

    /// Full MRL of this folder. For removable devices the current
    /// mountpoint is resolved through the fs factories; `None` when the
    /// device is not reachable.
    pub fn mrl(&self, core: &Core) -> Result<Option<String>> {
        if !self.is_removable {
            return Ok(Some(self.path.clone()));
        }
        let device = match Device::fetch(core, self.device_id)? {
            Some(d) => d,
            None => return Ok(None),
        };
        let uuid = device.read().uuid().to_string();
        for factory in core.fs_factories.read().iter() {
            if let Some(device_fs) = factory.create_device(&uuid) {
                return Ok(Some(format!("{}{}", device_fs.mountpoint(), self.path)));
            }
        }
        Ok(None)
    }

    pub fn set_blacklisted(&mut self, core: &Core, blacklisted: bool) -> Result<()> {
        if self.is_blacklisted == blacklisted {
            return Ok(());
        }
        core.db.writer().execute(
            "UPDATE Folder SET is_blacklisted = ? WHERE id_folder = ?",
            params![blacklisted, self.id],
        )?;
        self.is_blacklisted = blacklisted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::file::File;
    use crate::model::media::Media;
    use crate::model::MediaType;
    use crate::test_utils::TestLibrary;

    #[test]
    fn roots_are_listed_as_entry_points() {
        let t = TestLibrary::new();
        let root = t.ensure_folder("file:///music/");
        let roots = Folder::entry_points(t.core()).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].read().id(), root.read().id());

        root.write().set_blacklisted(t.core(), true).unwrap();
        assert!(Folder::entry_points(t.core()).unwrap().is_empty());
    }

    #[test]
    fn lookup_honours_the_blacklist_filter() {
        let t = TestLibrary::new();
        let folder = t.ensure_folder("file:///music/banned/");
        folder.write().set_blacklisted(t.core(), true).unwrap();

        assert!(Folder::from_mrl(t.core(), "file:///music/banned/", BannedType::NotBanned)
            .unwrap()
            .is_none());
        assert!(Folder::from_mrl(t.core(), "file:///music/banned/", BannedType::Banned)
            .unwrap()
            .is_some());
        assert!(Folder::from_mrl(t.core(), "file:///music/banned/", BannedType::Any)
            .unwrap()
            .is_some());
    }

    #[test]
    fn removable_folders_store_device_relative_paths() {
        let t = TestLibrary::new();
        t.fs.add_device("usb", "file:///mnt/usb/", true);
        let folder = t.ensure_folder("file:///mnt/usb/deep/albums/");
        assert!(folder.read().is_removable());
        assert_eq!(folder.read().path(), "deep/albums/");
        assert_eq!(
            folder.read().mrl(t.core()).unwrap().as_deref(),
            Some("file:///mnt/usb/deep/albums/")
        );
    }

    #[test]
    fn deleting_a_folder_cascades_to_files_and_media() {
        let t = TestLibrary::new();
        let (media, file) = t.add_media_at("file:///music/doomed/a.mp3", MediaType::Audio);
        let media_id = media.read().id();
        let file_id = file.read().id();
        let folder_id = file.read().folder_id().unwrap();
        drop((media, file));

        assert!(Folder::destroy(t.core(), folder_id).unwrap());
        t.ml.clear_cache();
        assert!(File::fetch(t.core(), file_id).unwrap().is_none());
        assert!(Media::fetch(t.core(), media_id).unwrap().is_none());
    }
}

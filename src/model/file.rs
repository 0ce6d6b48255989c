//! File rows: every on-disk (or external) resource backing a media or a
//! playlist.
//!
//! For files on removable devices only the file name is stored; the full
//! MRL is rebuilt from the folder, which itself is relative to the device
//! mountpoint.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::db::entity::{self, DatabaseEntity};
use crate::error::Result;
use crate::fs::FsFile;
use crate::model::folder::Folder;
use crate::model::media::{Media, MediaPtr};
use crate::model::FileType;

pub type FilePtr = EntityPtr<File>;

#[derive(Debug, Clone, Serialize)]
pub struct File {
    id: i64,
    media_id: Option<i64>,
    playlist_id: Option<i64>,
    mrl: String,
    file_type: FileType,
    last_modification_date: i64,
    size: i64,
    folder_id: Option<i64>,
    is_present: bool,
    is_removable: bool,
    is_external: bool,
}

impl DatabaseEntity for File {
    const TABLE: &'static str = "File";
    const PRIMARY_KEY: &'static str = "id_file";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_file")?,
            media_id: row.get("media_id")?,
            playlist_id: row.get("playlist_id")?,
            mrl: row.get("mrl")?,
            file_type: FileType::from_i64(row.get("type")?),
            last_modification_date: row
                .get::<_, Option<i64>>("last_modification_date")?
                .unwrap_or(0),
            size: row.get::<_, Option<i64>>("size")?.unwrap_or(0),
            folder_id: row.get("folder_id")?,
            is_present: row.get("is_present")?,
            is_removable: row.get("is_removable")?,
            is_external: row.get("is_external")?,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn shard(cache: &EntityCache) -> &CacheShard<Self> {
        &cache.files
    }
}

impl File {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS File (
                id_file INTEGER PRIMARY KEY AUTOINCREMENT,
                media_id UNSIGNED INT DEFAULT NULL,
                playlist_id UNSIGNED INT DEFAULT NULL,
                mrl TEXT,
                type UNSIGNED INTEGER,
                last_modification_date UNSIGNED INT,
                size UNSIGNED INT,
                folder_id UNSIGNED INTEGER,
                is_present BOOLEAN NOT NULL DEFAULT 1,
                is_removable BOOLEAN NOT NULL,
                is_external BOOLEAN NOT NULL,
                FOREIGN KEY (media_id) REFERENCES Media(id_media) ON DELETE CASCADE,
                FOREIGN KEY (playlist_id) REFERENCES Playlist(id_playlist) ON DELETE CASCADE,
                FOREIGN KEY (folder_id) REFERENCES Folder(id_folder) ON DELETE CASCADE,
                UNIQUE(mrl, folder_id) ON CONFLICT FAIL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn create_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS is_folder_present
             AFTER UPDATE OF is_present ON Folder
             BEGIN
                UPDATE File SET is_present = new.is_present
                    WHERE folder_id = new.id_folder;
             END;
             CREATE INDEX IF NOT EXISTS file_media_id_index ON File(media_id);
             CREATE INDEX IF NOT EXISTS file_folder_id_index ON File(folder_id);",
        )?;
        Ok(())
    }

    /// Insert a file discovered on disk for an existing media.
    pub fn create_from_media(
        core: &Core,
        media_id: i64,
        file_type: FileType,
        file_fs: &dyn FsFile,
        folder_id: i64,
        is_removable: bool,
    ) -> Result<FilePtr> {
        debug_assert!(media_id > 0);
        let mrl = if is_removable {
            file_fs.name().to_string()
        } else {
            file_fs.mrl()
        };
        let record = File {
            id: 0,
            media_id: Some(media_id),
            playlist_id: None,
            mrl: mrl.clone(),
            file_type,
            last_modification_date: file_fs.last_modification_date(),
            size: file_fs.size(),
            folder_id: Some(folder_id),
            is_present: true,
            is_removable,
            is_external: false,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO File(media_id, mrl, type, folder_id, last_modification_date,
                              size, is_removable, is_external)
             VALUES(?, ?, ?, ?, ?, ?, ?, 0)",
            params![
                media_id,
                mrl,
                file_type.to_i64(),
                folder_id,
                file_fs.last_modification_date(),
                file_fs.size(),
                is_removable
            ],
        )
    }

    /// Insert a file that lives outside the discovered folders (streams,
    /// p2p transport payloads, manually added MRLs).
    ///
    /// SQLite does not enforce `UNIQUE(mrl, folder_id)` when `folder_id` is
    /// NULL, so uniqueness is checked here.
    pub fn create_external(
        core: &Core,
        media_id: i64,
        file_type: FileType,
        mrl: &str,
    ) -> Result<Option<FilePtr>> {
        debug_assert!(media_id > 0);
        let existing: Option<FilePtr> = entity::fetch_one(
            core,
            "SELECT * FROM File WHERE folder_id IS NULL AND mrl = ?",
            [mrl],
        )?;
        if existing.is_some() {
            return Ok(None);
        }
        let record = File {
            id: 0,
            media_id: Some(media_id),
            playlist_id: None,
            mrl: mrl.to_string(),
            file_type,
            last_modification_date: 0,
            size: 0,
            folder_id: None,
            is_present: true,
            is_removable: false,
            is_external: true,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO File(media_id, mrl, type, folder_id, is_removable, is_external)
             VALUES(?, ?, ?, NULL, 0, 1)",
            params![media_id, mrl, file_type.to_i64()],
        )
        .map(Some)
    }

    /// Insert the backing file of a file-based playlist.
    pub fn create_from_playlist(
        core: &Core,
        playlist_id: i64,
        file_fs: &dyn FsFile,
        folder_id: i64,
        is_removable: bool,
    ) -> Result<FilePtr> {
        debug_assert!(playlist_id > 0);
        let mrl = if is_removable {
            file_fs.name().to_string()
        } else {
            file_fs.mrl()
        };
        let record = File {
            id: 0,
            media_id: None,
            playlist_id: Some(playlist_id),
            mrl: mrl.clone(),
            file_type: FileType::Playlist,
            last_modification_date: file_fs.last_modification_date(),
            size: file_fs.size(),
            folder_id: Some(folder_id),
            is_present: true,
            is_removable,
            is_external: false,
        };
        entity::insert(
            core,
            record,
            "INSERT INTO File(playlist_id, mrl, type, folder_id, last_modification_date,
                              size, is_removable, is_external)
             VALUES(?, ?, ?, ?, ?, ?, ?, 0)",
            params![
                playlist_id,
                mrl,
                FileType::Playlist.to_i64(),
                folder_id,
                file_fs.last_modification_date(),
                file_fs.size(),
                is_removable
            ],
        )
    }

    pub fn fetch(core: &Core, id: i64) -> Result<Option<FilePtr>> {
        entity::fetch(core, id)
    }

    /// Lookup by full MRL; only valid for files on non-removable devices.
    pub fn from_mrl(core: &Core, mrl: &str) -> Result<Option<FilePtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM File WHERE mrl = ? AND folder_id IS NOT NULL",
            [mrl],
        )
    }

    /// Lookup by name inside a folder; used for removable devices.
    pub fn from_file_name(core: &Core, name: &str, folder_id: i64) -> Result<Option<FilePtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM File WHERE mrl = ? AND folder_id = ?",
            params![name, folder_id],
        )
    }

    pub fn from_external_mrl(core: &Core, mrl: &str) -> Result<Option<FilePtr>> {
        entity::fetch_one(
            core,
            "SELECT * FROM File WHERE mrl = ? AND folder_id IS NULL",
            [mrl],
        )
    }

    pub fn from_folder(core: &Core, folder_id: i64) -> Result<Vec<FilePtr>> {
        entity::fetch_all(core, "SELECT * FROM File WHERE folder_id = ?", [folder_id])
    }

    pub fn destroy(core: &Core, id: i64) -> Result<bool> {
        entity::destroy::<File>(core, id)
    }

    pub fn media_id(&self) -> Option<i64> {
        self.media_id
    }

    pub fn playlist_id(&self) -> Option<i64> {
        self.playlist_id
    }

    pub fn media(&self, core: &Core) -> Result<Option<MediaPtr>> {
        match self.media_id {
            Some(id) => Media::fetch(core, id),
            None => Ok(None),
        }
    }

    pub fn folder_id(&self) -> Option<i64> {
        self.folder_id
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn last_modification_date(&self) -> i64 {
        self.last_modification_date
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn is_present(&self) -> bool {
        self.is_present
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn is_removable(&self) -> bool {
        self.is_removable
    }

    /// The stored MRL: full for non-removable files, bare name otherwise.
    pub fn raw_mrl(&self) -> &str {
        &self.mrl
    }

    /// Full MRL, resolving the folder for removable files.
    pub fn mrl(&self, core: &Core) -> Result<Option<String>> {
        if !self.is_removable {
            return Ok(Some(self.mrl.clone()));
        }
        let folder = match self.folder_id {
            Some(id) => Folder::fetch(core, id)?,
            None => None,
        };
        match folder {
            Some(folder) => {
                let base = folder.read().mrl(core)?;
                Ok(base.map(|b| format!("{}{}", b, self.mrl)))
            }
            None => Ok(None),
        }
    }

    /// Rewrite the stored MRL. Used by the URL re-encoding migrations.
    pub fn set_mrl(&mut self, core: &Core, mrl: &str) -> Result<()> {
        if self.mrl == mrl {
            return Ok(());
        }
        core.db.writer().execute(
            "UPDATE File SET mrl = ? WHERE id_file = ?",
            params![mrl, self.id],
        )?;
        self.mrl = mrl.to_string();
        Ok(())
    }
}

//! Persistent parse tasks.
//!
//! A task records which pipeline steps already ran for a file, so work
//! survives restarts: rehydrated tasks skip completed steps. Runtime
//! references (fs handles, live entities) are resolved on creation or by
//! [`ParseTask::restore_linked_entities`] after a restart.

use std::sync::Arc;

use rusqlite::{params, Connection, Row};
use tracing::error;

use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::error::Result;
use crate::fs::{FsDirectory, FsFile};
use crate::model::file::{File, FilePtr};
use crate::model::folder::{Folder, FolderPtr};
use crate::model::media::MediaPtr;
use crate::model::playlist::{Playlist, PlaylistPtr};
use crate::utils::mrl;

/// Completed-step bitmask values.
pub mod step {
    pub const NONE: u8 = 0;
    pub const PROBE: u8 = 1;
    pub const METADATA: u8 = 2;
    pub const THUMBNAIL: u8 = 4;
    pub const COMPLETED: u8 = PROBE | METADATA | THUMBNAIL;
}

/// Outcome of one service run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    /// Transient failure; the task is re-enqueued until it runs out of
    /// retries.
    Error,
    /// Unrecoverable; the task is abandoned.
    Fatal,
}

/// Maximum run attempts per task before it is parked.
pub const MAX_RETRIES: i64 = 3;

pub struct ParseTask {
    pub id: i64,
    step: u8,
    pub retry_count: i64,
    pub mrl: String,
    pub file_id: Option<i64>,
    pub parent_folder_id: Option<i64>,
    pub parent_playlist_id: Option<i64>,
    pub parent_playlist_index: i64,

    // Runtime state, rebuilt on restore.
    pub file_fs: Option<Arc<dyn FsFile>>,
    pub parent_folder_fs: Option<Arc<dyn FsDirectory>>,
    pub file: Option<FilePtr>,
    pub media: Option<MediaPtr>,
    pub parent_folder: Option<FolderPtr>,
    pub parent_playlist: Option<PlaylistPtr>,
}

impl ParseTask {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ParseTask (
                id_task INTEGER PRIMARY KEY AUTOINCREMENT,
                step INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                mrl TEXT,
                file_id UNSIGNED INTEGER,
                parent_folder_id UNSIGNED INTEGER,
                parent_playlist_id INTEGER,
                parent_playlist_index UNSIGNED INTEGER,
                FOREIGN KEY (parent_folder_id) REFERENCES Folder(id_folder) ON DELETE CASCADE,
                FOREIGN KEY (file_id) REFERENCES File(id_file) ON DELETE CASCADE,
                FOREIGN KEY (parent_playlist_id) REFERENCES Playlist(id_playlist)
                    ON DELETE CASCADE,
                UNIQUE(mrl, parent_playlist_id, parent_playlist_index) ON CONFLICT FAIL
            )",
            [],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id_task")?,
            step: row.get::<_, i64>("step")? as u8,
            retry_count: row.get("retry_count")?,
            mrl: row.get("mrl")?,
            file_id: row.get("file_id")?,
            parent_folder_id: row.get("parent_folder_id")?,
            parent_playlist_id: row.get("parent_playlist_id")?,
            parent_playlist_index: row
                .get::<_, Option<i64>>("parent_playlist_index")?
                .unwrap_or(0),
            file_fs: None,
            parent_folder_fs: None,
            file: None,
            media: None,
            parent_folder: None,
            parent_playlist: None,
        })
    }

    /// Persist a new task for a discovered file. A constraint violation
    /// bubbles up; it usually means the file was already scheduled before a
    /// crash.
    pub fn create(
        core: &Core,
        file_fs: Arc<dyn FsFile>,
        parent_folder: FolderPtr,
        parent_folder_fs: Arc<dyn FsDirectory>,
        parent_playlist: Option<(PlaylistPtr, i64)>,
    ) -> Result<Box<ParseTask>> {
        let task_mrl = file_fs.mrl();
        let folder_id = parent_folder.read().id();
        let (playlist, playlist_index) = match parent_playlist {
            Some((playlist, index)) => (Some(playlist), index),
            None => (None, 0),
        };
        let playlist_id = playlist.as_ref().map(|p| p.read().id());
        let id = {
            let conn = core.db.writer();
            conn.execute(
                "INSERT INTO ParseTask(mrl, parent_folder_id, parent_playlist_id,
                                       parent_playlist_index)
                 VALUES(?, ?, ?, ?)",
                params![task_mrl, folder_id, playlist_id, playlist_index],
            )?;
            conn.last_insert_rowid()
        };
        Ok(Box::new(ParseTask {
            id,
            step: step::NONE,
            retry_count: 0,
            mrl: task_mrl,
            file_id: None,
            parent_folder_id: Some(folder_id),
            parent_playlist_id: playlist_id,
            parent_playlist_index: playlist_index,
            file_fs: Some(file_fs),
            parent_folder_fs: Some(parent_folder_fs),
            file: None,
            media: None,
            parent_folder: Some(parent_folder),
            parent_playlist: playlist,
        }))
    }

    pub fn step_mask(&self) -> u8 {
        self.step
    }

    pub fn mark_step_completed(&mut self, completed: u8) {
        self.step |= completed;
    }

    pub fn mark_step_uncompleted(&mut self, uncompleted: u8) {
        self.step &= !uncompleted;
    }

    pub fn is_step_completed(&self, queried: u8) -> bool {
        self.step & queried != 0
    }

    pub fn is_completed(&self) -> bool {
        self.step == step::COMPLETED
    }

    /// Persist the step mask and reset the retry counter.
    pub fn save_parser_step(&mut self, core: &Core) -> Result<()> {
        core.db.writer().execute(
            "UPDATE ParseTask SET step = ?, retry_count = 0 WHERE id_task = ?",
            params![self.step as i64, self.id],
        )?;
        self.retry_count = 0;
        Ok(())
    }

    /// Bump the attempt counter before a service runs, so a crash
    /// mid-parse still counts against the retry budget.
    pub fn start_parser_step(&mut self, core: &Core) -> Result<()> {
        core.db.writer().execute(
            "UPDATE ParseTask SET retry_count = retry_count + 1 WHERE id_task = ?",
            params![self.id],
        )?;
        self.retry_count += 1;
        Ok(())
    }

    /// Remember which file row this task produced.
    pub fn set_file(&mut self, core: &Core, file: FilePtr) -> Result<()> {
        let file_id = file.read().id();
        core.db.writer().execute(
            "UPDATE ParseTask SET file_id = ? WHERE id_task = ?",
            params![file_id, self.id],
        )?;
        self.file_id = Some(file_id);
        self.file = Some(file);
        Ok(())
    }

    /// Rebuild the runtime references after a restart. Fails (false) when
    /// the backing file is gone or its device is absent.
    pub fn restore_linked_entities(&mut self, core: &Core) -> Result<bool> {
        let factory = match core.fs_factory_for_mrl(&self.mrl) {
            Some(f) => f,
            None => return Ok(false),
        };
        let parent_folder_fs = match factory.create_directory(&mrl::directory(&self.mrl)) {
            Some(d) => d,
            None => return Ok(false),
        };
        let files = parent_folder_fs.files().unwrap_or_default();
        let file_fs = match files.into_iter().find(|f| f.mrl() == self.mrl) {
            Some(f) => f,
            None => {
                error!(mrl = %self.mrl, "failed to restore the fs file backing a task");
                return Ok(false);
            }
        };
        self.parent_folder_fs = Some(parent_folder_fs);
        self.file_fs = Some(file_fs);
        if let Some(file_id) = self.file_id {
            self.file = File::fetch(core, file_id)?;
            if let Some(file) = &self.file {
                let media_id = file.read().media_id();
                self.media = match media_id {
                    Some(id) => crate::model::media::Media::fetch(core, id)?,
                    None => None,
                };
            }
        }
        if let Some(folder_id) = self.parent_folder_id {
            self.parent_folder = Folder::fetch(core, folder_id)?;
        }
        if let Some(playlist_id) = self.parent_playlist_id {
            self.parent_playlist = Playlist::fetch(core, playlist_id)?;
        }
        Ok(true)
    }

    /// Give parked tasks another chance after user intervention.
    pub fn reset_retry_count(core: &Core) -> Result<()> {
        core.db.writer().execute(
            "UPDATE ParseTask SET retry_count = 0 WHERE step != ?",
            params![step::COMPLETED as i64],
        )?;
        Ok(())
    }

    /// Mark everything unparsed; used by force-rescan.
    pub fn reset_parsing(core: &Core) -> Result<()> {
        core.db.writer().execute(
            "UPDATE ParseTask SET retry_count = 0, step = ?",
            params![step::NONE as i64],
        )?;
        Ok(())
    }

    /// Create tasks for catalogued files that never got one. Recovery for
    /// databases written before tasks and files were inserted atomically.
    pub fn recover_unscanned_files(core: &Core) -> Result<()> {
        core.db.writer().execute(
            "INSERT INTO ParseTask(mrl, file_id, parent_folder_id, parent_playlist_index)
             SELECT f.mrl, f.id_file, f.folder_id, 0 FROM File f
             LEFT JOIN ParseTask t ON t.file_id = f.id_file
             WHERE t.id_task IS NULL AND f.folder_id IS NOT NULL",
            [],
        )?;
        Ok(())
    }

    /// Whether a discovery task (not a playlist child) already targets
    /// this MRL. The discoverer consults this before scheduling: a file
    /// may be awaiting its first parse and have no file row yet.
    pub fn exists_for_mrl(core: &Core, target: &str) -> Result<bool> {
        core.db.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(id_task) FROM ParseTask
                 WHERE mrl = ? AND parent_playlist_id IS NULL",
                params![target],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn delete_by_mrl(core: &Core, target: &str) -> Result<()> {
        core.db
            .writer()
            .execute("DELETE FROM ParseTask WHERE mrl = ?", params![target])?;
        Ok(())
    }

    /// Unfinished tasks with retry budget left, on present storage only.
    pub fn fetch_unparsed(core: &Core) -> Result<Vec<Box<ParseTask>>> {
        core.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM ParseTask t
                 LEFT JOIN File f ON f.id_file = t.file_id
                 WHERE t.step != ? AND t.retry_count < ?
                 AND (f.is_present != 0 OR t.file_id IS NULL)",
            )?;
            let rows = stmt.query_map(
                params![step::COMPLETED as i64, MAX_RETRIES],
                ParseTask::from_row,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(Box::new(row?));
            }
            Ok(out)
        })
    }
}

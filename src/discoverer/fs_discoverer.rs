//! Filesystem crawler: walks entry points, diffs directories against the
//! catalog and schedules parse work for new or changed files.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::discoverer::probe::CrawlerProbe;
use crate::error::Result;
use crate::fs::{FsDirectory, FsFile};
use crate::model::file::{File, FilePtr};
use crate::model::folder::{BannedType, Folder, FolderPtr};
use crate::parser::task::ParseTask;

pub struct FsDiscoverer {
    core: Arc<Core>,
    probe: CrawlerProbe,
}

impl FsDiscoverer {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            probe: CrawlerProbe,
        }
    }

    /// Register `entry_point` as a root folder and crawl it. Returns false
    /// when no filesystem claims the MRL or the folder is banned.
    pub fn discover(&self, entry_point: &str) -> Result<bool> {
        let core = &self.core;
        if Folder::from_mrl(core, entry_point, BannedType::Banned)?.is_some() {
            info!(entry_point, "not discovering banned entry point");
            return Ok(false);
        }
        if let Some(existing) = Folder::from_mrl(core, entry_point, BannedType::NotBanned)? {
            return self.reload_folder(&existing).map(|_| true);
        }
        let factory = match core.fs_factory_for_mrl(entry_point) {
            Some(f) => f,
            None => {
                warn!(entry_point, "no filesystem factory for entry point");
                return Ok(false);
            }
        };
        factory.refresh_devices();
        let dir_fs = match factory.create_directory(entry_point) {
            Some(d) => d,
            None => {
                warn!(entry_point, "entry point is not a reachable directory");
                return Ok(false);
            }
        };
        let location = match Folder::locate_device(core, &dir_fs.mrl())? {
            Some(l) => l,
            None => return Ok(false),
        };
        let folder = Folder::create(core, &dir_fs.mrl(), None, &location)?;
        self.check_folder(&dir_fs, &folder)?;
        Ok(true)
    }

    /// Re-crawl one entry point, or every root when `entry_point` is None.
    pub fn reload(&self, entry_point: Option<&str>) -> Result<()> {
        match entry_point {
            Some(entry_point) => {
                match Folder::from_mrl(&self.core, entry_point, BannedType::NotBanned)? {
                    Some(folder) => self.reload_folder(&folder),
                    None => {
                        warn!(entry_point, "cannot reload an unknown entry point");
                        Ok(())
                    }
                }
            }
            None => {
                for root in Folder::entry_points(&self.core)? {
                    self.reload_folder(&root)?;
                }
                Ok(())
            }
        }
    }

    fn reload_folder(&self, folder: &FolderPtr) -> Result<()> {
        let folder_mrl = match folder.read().mrl(&self.core)? {
            Some(m) => m,
            None => {
                debug!("folder device is absent, skipping reload");
                return Ok(());
            }
        };
        let factory = match self.core.fs_factory_for_mrl(&folder_mrl) {
            Some(f) => f,
            None => return Ok(()),
        };
        factory.refresh_devices();
        let dir_fs = match factory.create_directory(&folder_mrl) {
            Some(d) => d,
            None => {
                debug!(mrl = %folder_mrl, "folder is not reachable, skipping reload");
                return Ok(());
            }
        };
        self.check_folder(&dir_fs, folder)
    }

    /// Diff one directory against the catalog, recursing into sub-folders.
    /// Filesystem errors skip the subtree; a single unreadable directory
    /// never aborts the crawl.
    fn check_folder(&self, dir_fs: &Arc<dyn FsDirectory>, folder: &FolderPtr) -> Result<()> {
        let core = &self.core;
        if let Some(cb) = core.callback() {
            cb.on_discovery_progress(&dir_fs.mrl());
        }
        let fs_files = match dir_fs.files() {
            Ok(files) => files,
            Err(err) => {
                warn!(mrl = %dir_fs.mrl(), "failed to list files: {}", err);
                return Ok(());
            }
        };
        let fs_dirs = match dir_fs.dirs() {
            Ok(dirs) => dirs,
            Err(err) => {
                warn!(mrl = %dir_fs.mrl(), "failed to list sub-folders: {}", err);
                return Ok(());
            }
        };
        self.check_files(&fs_files, dir_fs, folder)?;
        self.check_subfolders(&fs_dirs, folder)?;
        Ok(())
    }

    fn check_files(
        &self,
        fs_files: &[Arc<dyn FsFile>],
        dir_fs: &Arc<dyn FsDirectory>,
        folder: &FolderPtr,
    ) -> Result<()> {
        let core = &self.core;
        let folder_id = folder.read().id();
        let is_removable = folder.read().is_removable();
        let known: Vec<FilePtr> = File::from_folder(core, folder_id)?;
        let mut known_by_mrl: HashMap<String, FilePtr> = known
            .into_iter()
            .map(|f| {
                let mrl = f.read().raw_mrl().to_string();
                (mrl, f)
            })
            .collect();

        for file_fs in fs_files {
            if !self.probe.should_index_file(file_fs.as_ref()) {
                continue;
            }
            let key = if is_removable {
                file_fs.name().to_string()
            } else {
                file_fs.mrl()
            };
            match known_by_mrl.remove(&key) {
                None => {
                    // The file may already be queued from a previous pass
                    // that never got parsed.
                    if !ParseTask::exists_for_mrl(core, &file_fs.mrl())? {
                        self.add_discovered_file(
                            file_fs.clone(),
                            folder.clone(),
                            dir_fs.clone(),
                        );
                    }
                }
                Some(existing) => {
                    let stored_mtime = existing.read().last_modification_date();
                    if stored_mtime != file_fs.last_modification_date() {
                        info!(mrl = %file_fs.mrl(), "file changed, scheduling a re-parse");
                        let file_id = existing.read().id();
                        File::destroy(core, file_id)?;
                        ParseTask::delete_by_mrl(core, &file_fs.mrl())?;
                        self.add_discovered_file(
                            file_fs.clone(),
                            folder.clone(),
                            dir_fs.clone(),
                        );
                    }
                }
            }
        }

        // Whatever is left in the map vanished from the filesystem.
        for (stored_mrl, removed) in known_by_mrl {
            info!(mrl = %stored_mrl, "file removed from storage, deleting it");
            let file_id = removed.read().id();
            File::destroy(core, file_id)?;
            ParseTask::delete_by_mrl(core, &stored_mrl)?;
            // The cascade may have deleted media and their albums.
            core.cache.media.clear();
            core.cache.album_tracks.clear();
            core.cache.albums.clear();
            core.cache.artists.clear();
        }
        Ok(())
    }

    fn check_subfolders(
        &self,
        fs_dirs: &[Arc<dyn FsDirectory>],
        folder: &FolderPtr,
    ) -> Result<()> {
        let core = &self.core;
        let folder_id = folder.read().id();
        let known = Folder::children(core, folder_id)?;
        let mut known_by_path: HashMap<String, FolderPtr> = known
            .into_iter()
            .map(|f| {
                let path = f.read().path().to_string();
                (path, f)
            })
            .collect();

        for dir_fs in fs_dirs {
            let dir_mrl = dir_fs.mrl();
            if !self.probe.should_enter_directory(core, &dir_mrl)? {
                debug!(mrl = %dir_mrl, "skipping filtered directory");
                continue;
            }
            let location = match Folder::locate_device(core, &dir_mrl)? {
                Some(l) => l,
                None => continue,
            };
            let key = if location.is_removable {
                dir_mrl
                    .strip_prefix(location.mountpoint.as_str())
                    .unwrap_or(&dir_mrl)
                    .to_string()
            } else {
                dir_mrl.clone()
            };
            let child = match known_by_path.remove(&key) {
                Some(existing) => existing,
                None => Folder::create(core, &dir_mrl, Some(folder_id), &location)?,
            };
            self.check_folder(dir_fs, &child)?;
        }

        for (path, removed) in known_by_path {
            info!(%path, "folder removed from storage, deleting it");
            let removed_id = removed.read().id();
            Folder::destroy(core, removed_id)?;
            core.cache.media.clear();
            core.cache.files.clear();
            core.cache.album_tracks.clear();
            core.cache.albums.clear();
            core.cache.artists.clear();
        }
        Ok(())
    }

    /// Create a parse task for a newly seen file and feed it to the
    /// parser. A constraint violation means the task already exists,
    /// typically after a crash during a previous discovery.
    fn add_discovered_file(
        &self,
        file_fs: Arc<dyn FsFile>,
        parent_folder: FolderPtr,
        parent_folder_fs: Arc<dyn FsDirectory>,
    ) {
        let task_mrl = file_fs.mrl();
        match ParseTask::create(&self.core, file_fs, parent_folder, parent_folder_fs, None) {
            Ok(task) => {
                if let Some(parser) = self.core.parser() {
                    parser.parse(task);
                }
            }
            Err(err) if err.is_constraint() => {
                warn!(
                    mrl = %task_mrl,
                    "failed to insert a task: {}. Assuming the file is already scheduled",
                    err
                );
            }
            Err(err) => {
                warn!(mrl = %task_mrl, "failed to create a parse task: {}", err);
            }
        }
    }

    /// Drop an entry point and everything under it.
    pub fn remove_entry_point(&self, entry_point: &str) -> Result<bool> {
        let folder = match Folder::from_mrl(&self.core, entry_point, BannedType::Any)? {
            Some(f) => f,
            None => return Ok(false),
        };
        let folder_id = folder.read().id();
        info!(entry_point, "removing entry point");
        let destroyed = Folder::destroy(&self.core, folder_id)?;
        self.core.cache.clear();
        Ok(destroyed)
    }

    /// Mark a folder tree excluded, dropping any previously catalogued
    /// content below it.
    pub fn ban(&self, entry_point: &str) -> Result<bool> {
        let core = &self.core;
        if let Some(existing) = Folder::from_mrl(core, entry_point, BannedType::Any)? {
            let folder_id = existing.read().id();
            Folder::destroy(core, folder_id)?;
            core.cache.clear();
        }
        let location = match Folder::locate_device(core, entry_point)? {
            Some(l) => l,
            None => return Ok(false),
        };
        let marker = Folder::create(core, entry_point, None, &location)?;
        marker.write().set_blacklisted(core, true)?;
        Ok(true)
    }

    /// Lift a ban and re-crawl the entry point.
    pub fn unban(&self, entry_point: &str) -> Result<bool> {
        let folder = match Folder::from_mrl(&self.core, entry_point, BannedType::Banned)? {
            Some(f) => f,
            None => return Ok(false),
        };
        folder.write().set_blacklisted(&self.core, false)?;
        self.reload_folder(&folder)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::media::Media;
    use crate::model::MediaType;
    use crate::test_utils::TestLibrary;

    fn task_count(t: &TestLibrary) -> i64 {
        t.core()
            .db
            .reader()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM ParseTask", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn discover_catalogs_folders_and_schedules_tasks() {
        let t = TestLibrary::new();
        t.fs.add_file("file:///music/a.mp3", 1, 10).unwrap();
        t.fs.add_file("file:///music/sub/b.flac", 1, 10).unwrap();
        t.fs.add_file("file:///music/.hidden/c.mp3", 1, 10).unwrap();
        t.fs.add_file("file:///music/notes.txt", 1, 10).unwrap();

        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.discover("file:///music/").unwrap());

        let roots = Folder::entry_points(t.core()).unwrap();
        assert_eq!(roots.len(), 1);
        let children = Folder::children(t.core(), roots[0].read().id()).unwrap();
        assert_eq!(children.len(), 1, "hidden folders must not be catalogued");
        assert_eq!(children[0].read().path(), "file:///music/sub/");
        // One task per whitelisted file; the text file is filtered out.
        assert_eq!(task_count(&t), 2);
    }

    #[test]
    fn rediscovery_does_not_duplicate_tasks() {
        let t = TestLibrary::new();
        t.fs.add_file("file:///music/a.mp3", 1, 10).unwrap();
        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.discover("file:///music/").unwrap());
        assert!(discoverer.discover("file:///music/").unwrap());
        discoverer.reload(Some("file:///music/")).unwrap();
        assert_eq!(task_count(&t), 1);
    }

    #[test]
    fn vanished_files_are_deleted_on_reload() {
        let t = TestLibrary::new();
        let (media, _file) = t.add_media_at("file:///music/z.mp3", MediaType::Audio);
        let media_id = media.read().id();
        drop(media);

        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.discover("file:///music/").unwrap());
        assert!(Media::fetch(t.core(), media_id).unwrap().is_some());

        t.fs.remove_file("file:///music/z.mp3");
        discoverer.reload(Some("file:///music/")).unwrap();
        assert!(Media::fetch(t.core(), media_id).unwrap().is_none());
    }

    #[test]
    fn modified_files_are_rescheduled() {
        let t = TestLibrary::new();
        // Catalog the file as if a previous scan had parsed it.
        let (media, _row) = t.add_media_at("file:///music/m.mp3", MediaType::Audio);
        let media_id = media.read().id();
        drop(media);

        let discoverer = FsDiscoverer::new(t.core().clone());
        discoverer.reload(Some("file:///music/")).unwrap();
        assert_eq!(task_count(&t), 0, "unchanged files must not be rescheduled");
        assert!(Media::fetch(t.core(), media_id).unwrap().is_some());

        // Same file, newer modification date.
        t.fs.remove_file("file:///music/m.mp3");
        t.fs.add_file("file:///music/m.mp3", 2000, 10).unwrap();
        discoverer.reload(Some("file:///music/")).unwrap();
        assert_eq!(task_count(&t), 1);
        // The stale rows are gone; the re-parse will rebuild them.
        assert!(Media::fetch(t.core(), media_id).unwrap().is_none());
    }

    #[test]
    fn banned_folders_are_skipped_until_unbanned() {
        let t = TestLibrary::new();
        t.fs.add_file("file:///music/skip/a.mp3", 1, 10).unwrap();
        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.ban("file:///music/skip/").unwrap());
        assert!(discoverer.discover("file:///music/").unwrap());
        assert_eq!(task_count(&t), 0);

        assert!(discoverer.unban("file:///music/skip/").unwrap());
        assert_eq!(task_count(&t), 1);
    }

    #[test]
    fn unreadable_directories_are_skipped_not_fatal() {
        let t = TestLibrary::new();
        t.fs.add_file("file:///music/a.mp3", 1, 10).unwrap();
        t.fs.set_unreadable("file:///music/", true);

        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.discover("file:///music/").unwrap());
        assert_eq!(task_count(&t), 0);

        t.fs.set_unreadable("file:///music/", false);
        discoverer.reload(Some("file:///music/")).unwrap();
        assert_eq!(task_count(&t), 1);
    }

    #[test]
    fn vanished_subfolders_are_dropped_on_reload() {
        let t = TestLibrary::new();
        t.fs.add_file("file:///music/sub/b.mp3", 1, 10).unwrap();
        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.discover("file:///music/").unwrap());
        let root = Folder::entry_points(t.core()).unwrap().remove(0);
        let root_id = root.read().id();
        assert_eq!(Folder::children(t.core(), root_id).unwrap().len(), 1);

        t.fs.remove_folder("file:///music/sub/");
        discoverer.reload(Some("file:///music/")).unwrap();
        assert!(Folder::children(t.core(), root_id).unwrap().is_empty());
        // The subfolder's pending task went with it.
        assert_eq!(task_count(&t), 0);
    }

    #[test]
    fn removing_an_entry_point_drops_its_content() {
        let t = TestLibrary::new();
        let (media, _file) = t.add_media_at("file:///music/gone.mp3", MediaType::Audio);
        let media_id = media.read().id();
        drop(media);

        let discoverer = FsDiscoverer::new(t.core().clone());
        assert!(discoverer.remove_entry_point("file:///music/").unwrap());
        assert!(Folder::entry_points(t.core()).unwrap().is_empty());
        assert!(Media::fetch(t.core(), media_id).unwrap().is_none());
        assert!(!discoverer.remove_entry_point("file:///music/").unwrap());
    }
}

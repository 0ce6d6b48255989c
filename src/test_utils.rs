//! Shared fixtures: an in-memory library over the mock filesystem.

use std::sync::Arc;

use tempfile::TempDir;

use crate::callbacks::{InitResult, NoopCallback};
use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::fs::mock::MockFsFactory;
use crate::fs::FsFile;
use crate::library::MediaLibrary;
use crate::model::device::Device;
use crate::model::file::{File, FilePtr};
use crate::model::folder::{BannedType, Folder, FolderPtr};
use crate::model::media::{Media, MediaPtr};
use crate::model::{FileType, MediaType};
use crate::utils::mrl;

pub struct TestLibrary {
    pub ml: MediaLibrary,
    pub fs: Arc<MockFsFactory>,
    _thumbnails: TempDir,
}

impl TestLibrary {
    /// An initialized (not started) library over an in-memory database
    /// and the mock filesystem, with hooks installed through a no-op
    /// callback.
    pub fn new() -> Self {
        let fs = Arc::new(MockFsFactory::new());
        let thumbnails = TempDir::new().expect("failed to create a temp dir");
        let mut ml = MediaLibrary::new();
        ml.set_fs_factory(fs.clone());
        let result = ml.initialize_in_memory(
            thumbnails.path().to_str().unwrap(),
            Some(Arc::new(NoopCallback)),
        );
        assert_eq!(result, InitResult::Success);
        Self {
            ml,
            fs,
            _thumbnails: thumbnails,
        }
    }

    pub fn core(&self) -> &Arc<Core> {
        self.ml.core()
    }

    /// Folder row for `dir_mrl`, created as a root if unknown.
    pub fn ensure_folder(&self, dir_mrl: &str) -> FolderPtr {
        let core = self.core();
        let mut normalized = dir_mrl.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let _ = self.fs.add_folder(&normalized);
        if let Some(existing) = Folder::from_mrl(core, &normalized, BannedType::Any).unwrap() {
            return existing;
        }
        let location = Folder::locate_device(core, &normalized)
            .unwrap()
            .expect("the mock filesystem claims every file:// mrl");
        Folder::create(core, &normalized, None, &location).unwrap()
    }

    /// A media with its main file at `file_mrl`, bypassing the parser.
    pub fn add_media_at(&self, file_mrl: &str, media_type: MediaType) -> (MediaPtr, FilePtr) {
        let core = self.core();
        let folder = self.ensure_folder(&mrl::directory(file_mrl));
        let fs_file = self
            .fs
            .add_file(file_mrl, 1000, 4096)
            .expect("the mock filesystem accepts any file:// mrl");
        let folder_id = folder.read().id();
        let is_removable = folder.read().is_removable();
        let media = Media::create(core, media_type, mrl::file_name(file_mrl)).unwrap();
        let file = File::create_from_media(
            core,
            media.read().id(),
            FileType::Main,
            fs_file.as_ref() as &dyn FsFile,
            folder_id,
            is_removable,
        )
        .unwrap();
        (media, file)
    }

    /// Shorthand for an audio media under `file:///music/`.
    pub fn add_audio_media(&self, name: &str) -> MediaPtr {
        let (media, _) = self.add_media_at(
            &format!("file:///music/{}", name),
            MediaType::Audio,
        );
        media
    }

    /// The device row backing `uuid`, if the catalog knows it.
    pub fn device(&self, uuid: &str) -> Option<crate::db::cache::EntityPtr<Device>> {
        Device::from_uuid(self.core(), uuid).unwrap()
    }
}

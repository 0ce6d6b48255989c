//! In-memory filesystem used by the discoverer and presence tests.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::fs::{FsDevice, FsDirectory, FsFactory, FsFile};
use crate::utils::mrl;

pub struct MockFile {
    mrl: String,
    name: String,
    pub mtime: RwLock<i64>,
    pub size: i64,
}

impl FsFile for MockFile {
    fn mrl(&self) -> String {
        self.mrl.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn extension(&self) -> Option<String> {
        mrl::extension(&self.name).map(str::to_lowercase)
    }

    fn last_modification_date(&self) -> i64 {
        *self.mtime.read()
    }

    fn size(&self) -> i64 {
        self.size
    }
}

pub struct MockDirectory {
    mrl: String,
    files: RwLock<Vec<Arc<MockFile>>>,
    dirs: RwLock<Vec<Arc<MockDirectory>>>,
    factory_state: Arc<MockState>,
}

impl FsDirectory for MockDirectory {
    fn mrl(&self) -> String {
        self.mrl.clone()
    }

    fn files(&self) -> io::Result<Vec<Arc<dyn FsFile>>> {
        if self.factory_state.unreadable.read().contains(&self.mrl) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"));
        }
        Ok(self
            .files
            .read()
            .iter()
            .map(|f| f.clone() as Arc<dyn FsFile>)
            .collect())
    }

    fn dirs(&self) -> io::Result<Vec<Arc<dyn FsDirectory>>> {
        if self.factory_state.unreadable.read().contains(&self.mrl) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"));
        }
        Ok(self
            .dirs
            .read()
            .iter()
            .map(|d| d.clone() as Arc<dyn FsDirectory>)
            .collect())
    }
}

pub struct MockDevice {
    uuid: String,
    mountpoint: String,
    removable: bool,
    pub present: AtomicBool,
    root: Arc<MockDirectory>,
}

impl FsDevice for MockDevice {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn is_removable(&self) -> bool {
        self.removable
    }

    fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn mountpoint(&self) -> String {
        self.mountpoint.clone()
    }
}

#[derive(Default)]
struct MockState {
    unreadable: RwLock<HashSet<String>>,
}

/// Factory over a mutable in-memory tree. Tests build the tree, run the
/// discoverer, mutate, and reload.
pub struct MockFsFactory {
    devices: RwLock<Vec<Arc<MockDevice>>>,
    state: Arc<MockState>,
}

impl Default for MockFsFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFsFactory {
    pub fn new() -> Self {
        let factory = Self {
            devices: RwLock::new(Vec::new()),
            state: Arc::new(MockState::default()),
        };
        factory.add_device("mock-main", "file:///", false);
        factory
    }

    pub fn add_device(&self, uuid: &str, mountpoint: &str, removable: bool) -> Arc<MockDevice> {
        let mut mountpoint = mountpoint.to_string();
        if !mountpoint.ends_with('/') {
            mountpoint.push('/');
        }
        let device = Arc::new(MockDevice {
            uuid: uuid.to_string(),
            mountpoint: mountpoint.clone(),
            removable,
            present: AtomicBool::new(true),
            root: Arc::new(MockDirectory {
                mrl: mountpoint,
                files: RwLock::new(Vec::new()),
                dirs: RwLock::new(Vec::new()),
                factory_state: Arc::clone(&self.state),
            }),
        });
        let mut devices = self.devices.write();
        devices.push(Arc::clone(&device));
        devices.sort_by(|a, b| b.mountpoint.len().cmp(&a.mountpoint.len()));
        device
    }

    pub fn set_device_present(&self, uuid: &str, present: bool) {
        if let Some(device) = self.devices.read().iter().find(|d| d.uuid == uuid) {
            device.present.store(present, Ordering::SeqCst);
        }
    }

    fn lookup_dir(&self, dir_mrl: &str) -> Option<Arc<MockDirectory>> {
        let device = self
            .devices
            .read()
            .iter()
            .filter(|d| dir_mrl.starts_with(d.mountpoint.as_str()) && d.is_present())
            .max_by_key(|d| d.mountpoint.len())
            .cloned()?;
        let mut current = Arc::clone(&device.root);
        let relative = dir_mrl
            .strip_prefix(device.mountpoint.as_str())
            .unwrap_or("");
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            let next = {
                let dirs = current.dirs.read();
                dirs.iter()
                    .find(|d| mrl::file_name(d.mrl.trim_end_matches('/')) == segment)
                    .cloned()
            };
            current = next?;
        }
        Some(current)
    }

    /// Create (or return) a directory node for `dir_mrl`.
    pub fn add_folder(&self, dir_mrl: &str) -> Option<Arc<MockDirectory>> {
        let mut dir_mrl = dir_mrl.to_string();
        if !dir_mrl.ends_with('/') {
            dir_mrl.push('/');
        }
        let device = self
            .devices
            .read()
            .iter()
            .filter(|d| dir_mrl.starts_with(d.mountpoint.as_str()))
            .max_by_key(|d| d.mountpoint.len())
            .cloned()?;
        let mut current = Arc::clone(&device.root);
        let relative = dir_mrl
            .strip_prefix(device.mountpoint.as_str())
            .unwrap_or("")
            .to_string();
        let mut built = device.mountpoint.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            built = format!("{}{}/", built, segment);
            let existing = {
                let dirs = current.dirs.read();
                dirs.iter().find(|d| d.mrl == built).cloned()
            };
            current = match existing {
                Some(dir) => dir,
                None => {
                    let dir = Arc::new(MockDirectory {
                        mrl: built.clone(),
                        files: RwLock::new(Vec::new()),
                        dirs: RwLock::new(Vec::new()),
                        factory_state: Arc::clone(&self.state),
                    });
                    current.dirs.write().push(Arc::clone(&dir));
                    dir
                }
            };
        }
        Some(current)
    }

    /// Add a file, creating parent directories as needed.
    pub fn add_file(&self, file_mrl: &str, mtime: i64, size: i64) -> Option<Arc<MockFile>> {
        let dir = self.add_folder(&mrl::directory(file_mrl))?;
        let file = Arc::new(MockFile {
            mrl: file_mrl.to_string(),
            name: mrl::file_name(file_mrl).to_string(),
            mtime: RwLock::new(mtime),
            size,
        });
        dir.files.write().push(Arc::clone(&file));
        Some(file)
    }

    pub fn remove_file(&self, file_mrl: &str) {
        if let Some(dir) = self.lookup_dir(&mrl::directory(file_mrl)) {
            dir.files.write().retain(|f| f.mrl != file_mrl);
        }
    }

    pub fn remove_folder(&self, dir_mrl: &str) {
        let mut normalized = dir_mrl.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let parent = mrl::directory(normalized.trim_end_matches('/'));
        if let Some(dir) = self.lookup_dir(&parent) {
            dir.dirs.write().retain(|d| d.mrl != normalized);
        }
    }

    pub fn set_unreadable(&self, dir_mrl: &str, unreadable: bool) {
        let mut normalized = dir_mrl.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        if unreadable {
            self.state.unreadable.write().insert(normalized);
        } else {
            self.state.unreadable.write().remove(&normalized);
        }
    }
}

impl FsFactory for MockFsFactory {
    fn create_device(&self, uuid: &str) -> Option<Arc<dyn FsDevice>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.uuid == uuid && d.is_present())
            .cloned()
            .map(|d| d as Arc<dyn FsDevice>)
    }

    fn create_device_from_mrl(&self, target: &str) -> Option<Arc<dyn FsDevice>> {
        self.devices
            .read()
            .iter()
            .filter(|d| target.starts_with(d.mountpoint.as_str()) && d.is_present())
            .max_by_key(|d| d.mountpoint.len())
            .cloned()
            .map(|d| d as Arc<dyn FsDevice>)
    }

    fn create_directory(&self, dir_mrl: &str) -> Option<Arc<dyn FsDirectory>> {
        let mut normalized = dir_mrl.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        self.lookup_dir(&normalized)
            .map(|d| d as Arc<dyn FsDirectory>)
    }

    fn is_mrl_supported(&self, target: &str) -> bool {
        target.starts_with("file://")
    }

    fn is_network(&self) -> bool {
        false
    }

    fn refresh_devices(&self) {}
}

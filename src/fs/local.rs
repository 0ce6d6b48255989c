//! Local (`file://`) filesystem factory.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::fs::{DeviceLister, FsDevice, FsDirectory, FsFactory, FsFile};
use crate::utils::mrl;

/// Lister used when the host does not provide one: a single non-removable
/// device spanning the whole local filesystem.
pub struct DefaultDeviceLister;

impl DeviceLister for DefaultDeviceLister {
    fn devices(&self) -> Vec<(String, String, bool)> {
        vec![("local".to_string(), "file:///".to_string(), false)]
    }
}

struct LocalDevice {
    uuid: String,
    mountpoint: String,
    removable: bool,
}

impl FsDevice for LocalDevice {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn is_removable(&self) -> bool {
        self.removable
    }

    fn is_present(&self) -> bool {
        // Devices drop out of the factory's list when unmounted; a device
        // we can hand out is mounted by definition.
        true
    }

    fn mountpoint(&self) -> String {
        self.mountpoint.clone()
    }
}

struct LocalFile {
    mrl: String,
    name: String,
    last_modification_date: i64,
    size: i64,
}

impl FsFile for LocalFile {
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
        self.last_modification_date
    }

    fn size(&self) -> i64 {
        self.size
    }
}

struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    fn from_mrl(dir_mrl: &str) -> Option<Self> {
        let path = mrl::to_path(dir_mrl)?;
        Some(Self { path })
    }
}

impl FsDirectory for LocalDirectory {
    fn mrl(&self) -> String {
        let mut out = mrl::from_path(&self.path);
        if !out.ends_with('/') {
            out.push('/');
        }
        out
    }

    fn files(&self) -> io::Result<Vec<Arc<dyn FsFile>>> {
        let mut out: Vec<Arc<dyn FsFile>> = Vec::new();
        for entry in WalkDir::new(&self.path)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(io::Error::from)?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            out.push(Arc::new(LocalFile {
                mrl: mrl::from_path(entry.path()),
                name: entry.file_name().to_string_lossy().into_owned(),
                last_modification_date: mtime,
                size: metadata.len() as i64,
            }));
        }
        Ok(out)
    }

    fn dirs(&self) -> io::Result<Vec<Arc<dyn FsDirectory>>> {
        let mut out: Vec<Arc<dyn FsDirectory>> = Vec::new();
        for entry in WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                out.push(Arc::new(LocalDirectory {
                    path: entry.path().to_path_buf(),
                }));
            }
        }
        Ok(out)
    }
}

/// Factory for `file://` MRLs, resolving devices through a
/// [`DeviceLister`].
pub struct LocalFsFactory {
    lister: Arc<dyn DeviceLister>,
    devices: RwLock<Vec<Arc<LocalDevice>>>,
}

impl LocalFsFactory {
    pub fn new(lister: Arc<dyn DeviceLister>) -> Self {
        let factory = Self {
            lister,
            devices: RwLock::new(Vec::new()),
        };
        factory.refresh_devices();
        factory
    }
}

impl FsFactory for LocalFsFactory {
    fn create_device(&self, uuid: &str) -> Option<Arc<dyn FsDevice>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.uuid == uuid)
            .cloned()
            .map(|d| d as Arc<dyn FsDevice>)
    }

    fn create_device_from_mrl(&self, target: &str) -> Option<Arc<dyn FsDevice>> {
        // The device owning an MRL is the one with the longest matching
        // mountpoint prefix.
        self.devices
            .read()
            .iter()
            .filter(|d| target.starts_with(d.mountpoint.as_str()))
            .max_by_key(|d| d.mountpoint.len())
            .cloned()
            .map(|d| d as Arc<dyn FsDevice>)
    }

    fn create_directory(&self, dir_mrl: &str) -> Option<Arc<dyn FsDirectory>> {
        let dir = LocalDirectory::from_mrl(dir_mrl)?;
        if !dir.path.is_dir() {
            return None;
        }
        Some(Arc::new(dir))
    }

    fn is_mrl_supported(&self, target: &str) -> bool {
        target.starts_with("file://")
    }

    fn is_network(&self) -> bool {
        false
    }

    fn refresh_devices(&self) {
        let mut devices: Vec<Arc<LocalDevice>> = self
            .lister
            .devices()
            .into_iter()
            .map(|(uuid, mut mountpoint, removable)| {
                if !mountpoint.ends_with('/') {
                    mountpoint.push('/');
                }
                Arc::new(LocalDevice {
                    uuid,
                    mountpoint,
                    removable,
                })
            })
            .collect();
        // Longest mountpoints first so nested mounts win prefix matches.
        devices.sort_by(|a, b| b.mountpoint.len().cmp(&a.mountpoint.len()));
        *self.devices.write() = devices;
    }
}

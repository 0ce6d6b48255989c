//! Pluggable filesystem abstraction.
//!
//! The discoverer and parser never touch `std::fs` directly; they go
//! through factories resolving MRLs to devices, directories and files.
//! Factories are tried in insertion order and the first one supporting an
//! MRL wins. A local factory is always pre-installed; a network one can be
//! added or removed by the facade.

pub mod local;

#[cfg(test)]
pub mod mock;

use std::io;
use std::sync::Arc;

/// A storage device as seen by a filesystem factory.
pub trait FsDevice: Send + Sync {
    fn uuid(&self) -> &str;
    fn is_removable(&self) -> bool;
    fn is_present(&self) -> bool;
    /// Mountpoint MRL, always with a trailing '/'.
    fn mountpoint(&self) -> String;
}

/// Lazily enumerable directory.
pub trait FsDirectory: Send + Sync {
    /// MRL of this directory, always with a trailing '/'.
    fn mrl(&self) -> String;
    fn files(&self) -> io::Result<Vec<Arc<dyn FsFile>>>;
    fn dirs(&self) -> io::Result<Vec<Arc<dyn FsDirectory>>>;
}

/// A single file entry.
pub trait FsFile: Send + Sync {
    /// Full MRL.
    fn mrl(&self) -> String;
    /// Name within its directory.
    fn name(&self) -> &str;
    /// Lowercased extension, without the dot.
    fn extension(&self) -> Option<String>;
    fn last_modification_date(&self) -> i64;
    fn size(&self) -> i64;
}

/// Entry point into one kind of filesystem (local, network share, ...).
pub trait FsFactory: Send + Sync {
    fn create_device(&self, uuid: &str) -> Option<Arc<dyn FsDevice>>;
    fn create_device_from_mrl(&self, mrl: &str) -> Option<Arc<dyn FsDevice>>;
    fn create_directory(&self, mrl: &str) -> Option<Arc<dyn FsDirectory>>;
    fn is_mrl_supported(&self, mrl: &str) -> bool;
    fn is_network(&self) -> bool;
    /// Refresh the cached device list from the device lister.
    fn refresh_devices(&self);
}

/// Host-provided enumeration of mounted devices.
pub trait DeviceLister: Send + Sync {
    /// `(uuid, mountpoint mrl, is_removable)` triples for every mounted
    /// device.
    fn devices(&self) -> Vec<(String, String, bool)>;
}

/// Collaborator rendering a video frame for the thumbnailer. The media
/// decoder itself is outside this crate.
pub trait VideoFrameExtractor: Send + Sync {
    /// Produce an encoded image for `mrl`, or `None` when no frame can be
    /// obtained. The image bytes are written as-is to the thumbnail file.
    fn extract_frame(&self, mrl: &str) -> Option<Vec<u8>>;
}

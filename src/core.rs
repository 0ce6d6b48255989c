//! Shared state behind the facade: the storage engine, the entity cache,
//! the registered filesystem factories and the background-service handles.
//!
//! Workers hold an `Arc<Core>`; entity operations borrow it. The facade is
//! a thin shell that owns the `Arc` and drives lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::callbacks::LibraryCallback;
use crate::db::cache::EntityCache;
use crate::db::SqlStore;
use crate::fs::{DeviceLister, FsFactory, VideoFrameExtractor};
use crate::notifier::NotifierHub;
use crate::parser::Parser;

pub struct Core {
    pub db: SqlStore,
    pub cache: EntityCache,
    pub callback: RwLock<Option<Arc<dyn LibraryCallback>>>,
    pub notifier: RwLock<Option<Arc<NotifierHub>>>,
    pub parser: RwLock<Option<Arc<Parser>>>,
    pub fs_factories: RwLock<Vec<Arc<dyn FsFactory>>>,
    pub device_lister: RwLock<Option<Arc<dyn DeviceLister>>>,
    pub frame_extractor: RwLock<Option<Arc<dyn VideoFrameExtractor>>>,
    pub thumbnail_dir: RwLock<PathBuf>,
    discoverer_idle: AtomicBool,
    parser_idle: AtomicBool,
}

impl Core {
    pub fn new(db: SqlStore) -> Self {
        Self {
            db,
            cache: EntityCache::default(),
            callback: RwLock::new(None),
            notifier: RwLock::new(None),
            parser: RwLock::new(None),
            fs_factories: RwLock::new(Vec::new()),
            device_lister: RwLock::new(None),
            frame_extractor: RwLock::new(None),
            thumbnail_dir: RwLock::new(PathBuf::new()),
            discoverer_idle: AtomicBool::new(true),
            parser_idle: AtomicBool::new(true),
        }
    }

    pub fn callback(&self) -> Option<Arc<dyn LibraryCallback>> {
        self.callback.read().clone()
    }

    pub fn notifier(&self) -> Option<Arc<NotifierHub>> {
        self.notifier.read().clone()
    }

    pub fn parser(&self) -> Option<Arc<Parser>> {
        self.parser.read().clone()
    }

    /// First factory claiming support for `mrl`, in insertion order.
    pub fn fs_factory_for_mrl(&self, mrl: &str) -> Option<Arc<dyn FsFactory>> {
        self.fs_factories
            .read()
            .iter()
            .find(|f| f.is_mrl_supported(mrl))
            .cloned()
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.thumbnail_dir.read().clone()
    }

    /// Combine both background workers into the single host-visible idle
    /// signal: it turns false as soon as one worker wakes up, and true only
    /// once both are idle again.
    pub fn on_discoverer_idle_changed(&self, idle: bool) {
        if self.discoverer_idle.swap(idle, Ordering::SeqCst) != idle {
            info!(idle, "discoverer idle state changed");
            if !idle || self.parser_idle.load(Ordering::SeqCst) {
                if let Some(cb) = self.callback() {
                    cb.on_background_tasks_idle_changed(idle);
                }
            }
        }
    }

    pub fn on_parser_idle_changed(&self, idle: bool) {
        if self.parser_idle.swap(idle, Ordering::SeqCst) != idle {
            info!(idle, "parser idle state changed");
            if !idle || self.discoverer_idle.load(Ordering::SeqCst) {
                if let Some(cb) = self.callback() {
                    cb.on_background_tasks_idle_changed(idle);
                }
            }
        }
    }
}

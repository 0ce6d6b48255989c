//! Batched change notifications.
//!
//! Fine-grained events (entity kind, id, change type) are buffered as they
//! are produced by the update hooks, then drained by a dedicated thread
//! into the coarse host callbacks. A short coalescing window groups the
//! bursts a directory scan produces into single batched calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::info;

use crate::callbacks::LibraryCallback;

/// Entity kinds surfaced to the host callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Media,
    Album,
    Artist,
    Track,
    Playlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// How long the drain thread waits for more events before flushing a
/// batch.
const COALESCE_WINDOW: Duration = Duration::from_millis(500);

struct State {
    pending: HashMap<(EntityKind, ChangeType), Vec<i64>>,
    stopped: bool,
}

struct Shared {
    callback: Arc<dyn LibraryCallback>,
    state: Mutex<State>,
    cond: Condvar,
}

pub struct NotifierHub {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NotifierHub {
    pub fn new(callback: Arc<dyn LibraryCallback>) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                callback,
                state: Mutex::new(State {
                    pending: HashMap::new(),
                    stopped: false,
                }),
                cond: Condvar::new(),
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn start(&self) {
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none());
        let shared = Arc::clone(&self.shared);
        *thread = Some(
            std::thread::Builder::new()
                .name("notifier".into())
                .spawn(move || drain_loop(shared))
                .expect("failed to spawn the notifier thread"),
        );
    }

    /// Buffer one change event. Non-blocking; safe to call from an update
    /// hook.
    pub fn notify(&self, kind: EntityKind, change: ChangeType, id: i64) {
        let mut state = self.shared.state.lock();
        state.pending.entry((kind, change)).or_default().push(id);
        self.shared.cond.notify_one();
    }

    /// Flush what is buffered and stop the drain thread.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn drain_loop(shared: Arc<Shared>) {
    info!("entering notifier thread");
    loop {
        {
            let mut state = shared.state.lock();
            while state.pending.is_empty() && !state.stopped {
                shared.cond.wait(&mut state);
            }
            if state.stopped && state.pending.is_empty() {
                break;
            }
        }
        // Give bursty producers a moment to finish before flushing.
        std::thread::sleep(COALESCE_WINDOW);
        let batch = {
            let mut state = shared.state.lock();
            std::mem::take(&mut state.pending)
        };
        dispatch(&shared.callback, batch);
    }
    info!("exiting notifier thread");
}

fn dispatch(
    callback: &Arc<dyn LibraryCallback>,
    batch: HashMap<(EntityKind, ChangeType), Vec<i64>>,
) {
    for ((kind, change), mut ids) in batch {
        ids.sort_unstable();
        ids.dedup();
        match (kind, change) {
            (EntityKind::Media, ChangeType::Added) => callback.on_media_added(ids),
            (EntityKind::Media, ChangeType::Modified) => callback.on_media_modified(ids),
            (EntityKind::Media, ChangeType::Deleted) => callback.on_media_deleted(ids),
            (EntityKind::Album, ChangeType::Added) => callback.on_albums_added(ids),
            (EntityKind::Album, ChangeType::Modified) => callback.on_albums_modified(ids),
            (EntityKind::Album, ChangeType::Deleted) => callback.on_albums_deleted(ids),
            (EntityKind::Artist, ChangeType::Added) => callback.on_artists_added(ids),
            (EntityKind::Artist, ChangeType::Modified) => callback.on_artists_modified(ids),
            (EntityKind::Artist, ChangeType::Deleted) => callback.on_artists_deleted(ids),
            (EntityKind::Track, ChangeType::Added) => callback.on_tracks_added(ids),
            (EntityKind::Track, ChangeType::Deleted) => callback.on_tracks_deleted(ids),
            (EntityKind::Track, ChangeType::Modified) => {}
            (EntityKind::Playlist, ChangeType::Added) => callback.on_playlists_added(ids),
            (EntityKind::Playlist, ChangeType::Modified) => callback.on_playlists_modified(ids),
            (EntityKind::Playlist, ChangeType::Deleted) => callback.on_playlists_deleted(ids),
        }
    }
}

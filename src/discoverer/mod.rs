//! Discovery worker: a single thread draining a FIFO of entry-point
//! commands, crawling the filesystem and diffing it against the catalog.

pub mod fs_discoverer;
pub mod probe;

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::core::Core;
use crate::discoverer::fs_discoverer::FsDiscoverer;

#[derive(Debug, Clone)]
enum Command {
    Discover(String),
    Reload(Option<String>),
    Remove(String),
    Ban(String),
    Unban(String),
}

struct WorkerState {
    queue: VecDeque<Command>,
    stopped: bool,
}

struct Shared {
    core: Arc<Core>,
    state: Mutex<WorkerState>,
    cond: Condvar,
}

/// Entry points are folders; normalize them to a trailing slash so MRL
/// comparisons against directory listings are exact.
fn to_folder_mrl(entry_point: &str) -> String {
    let mut out = entry_point.to_string();
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

pub struct DiscovererWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DiscovererWorker {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            shared: Arc::new(Shared {
                core,
                state: Mutex::new(WorkerState {
                    queue: VecDeque::new(),
                    stopped: false,
                }),
                cond: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none());
        let shared = Arc::clone(&self.shared);
        *thread = Some(
            std::thread::Builder::new()
                .name("discoverer".into())
                .spawn(move || mainloop(shared))
                .expect("failed to spawn the discoverer thread"),
        );
    }

    fn enqueue(&self, command: Command) {
        let mut state = self.shared.state.lock();
        state.queue.push_back(command);
        self.shared.cond.notify_one();
    }

    pub fn discover(&self, entry_point: &str) {
        self.enqueue(Command::Discover(to_folder_mrl(entry_point)));
    }

    pub fn reload_all(&self) {
        self.enqueue(Command::Reload(None));
    }

    pub fn reload(&self, entry_point: &str) {
        self.enqueue(Command::Reload(Some(to_folder_mrl(entry_point))));
    }

    pub fn remove(&self, entry_point: &str) {
        self.enqueue(Command::Remove(to_folder_mrl(entry_point)));
    }

    pub fn ban(&self, entry_point: &str) {
        self.enqueue(Command::Ban(to_folder_mrl(entry_point)));
    }

    pub fn unban(&self, entry_point: &str) {
        self.enqueue(Command::Unban(to_folder_mrl(entry_point)));
    }

    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

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

fn mainloop(shared: Arc<Shared>) {
    info!("entering discoverer thread");
    let discoverer = FsDiscoverer::new(Arc::clone(&shared.core));
    'outer: loop {
        let command = loop {
            {
                let mut state = shared.state.lock();
                if state.stopped {
                    break 'outer;
                }
                if let Some(command) = state.queue.pop_front() {
                    break command;
                }
            }
            // The idle callback runs without holding the queue lock, so
            // hosts may re-enqueue from it.
            shared.core.on_discoverer_idle_changed(true);
            let mut state = shared.state.lock();
            if state.queue.is_empty() && !state.stopped {
                shared.cond.wait(&mut state);
            }
        };
        shared.core.on_discoverer_idle_changed(false);
        run_command(&shared.core, &discoverer, command);
    }
    info!("exiting discoverer thread");
}

fn run_command(core: &Arc<Core>, discoverer: &FsDiscoverer, command: Command) {
    let callback = core.callback();
    match command {
        Command::Discover(entry_point) => {
            if let Some(cb) = &callback {
                cb.on_discovery_started(&entry_point);
            }
            match discoverer.discover(&entry_point) {
                Ok(true) => info!(%entry_point, "discovery completed"),
                Ok(false) => warn!(%entry_point, "entry point was not discovered"),
                Err(err) => warn!(%entry_point, "discovery failed: {}", err),
            }
            if let Some(cb) = &callback {
                cb.on_discovery_completed(&entry_point);
            }
        }
        Command::Reload(entry_point) => {
            let label = entry_point.clone().unwrap_or_default();
            if let Some(cb) = &callback {
                cb.on_reload_started(&label);
            }
            if let Err(err) = discoverer.reload(entry_point.as_deref()) {
                warn!(entry_point = %label, "reload failed: {}", err);
            }
            if let Some(cb) = &callback {
                cb.on_reload_completed(&label);
            }
        }
        Command::Remove(entry_point) => {
            let success = match discoverer.remove_entry_point(&entry_point) {
                Ok(success) => success,
                Err(err) => {
                    warn!(%entry_point, "failed to remove entry point: {}", err);
                    false
                }
            };
            if let Some(cb) = &callback {
                cb.on_entry_point_removed(&entry_point, success);
            }
        }
        Command::Ban(entry_point) => {
            let success = match discoverer.ban(&entry_point) {
                Ok(success) => success,
                Err(err) => {
                    warn!(%entry_point, "failed to ban entry point: {}", err);
                    false
                }
            };
            if let Some(cb) = &callback {
                cb.on_entry_point_banned(&entry_point, success);
            }
        }
        Command::Unban(entry_point) => {
            let success = match discoverer.unban(&entry_point) {
                Ok(success) => success,
                Err(err) => {
                    warn!(%entry_point, "failed to unban entry point: {}", err);
                    false
                }
            };
            if let Some(cb) = &callback {
                cb.on_entry_point_unbanned(&entry_point, success);
            }
        }
    }
}

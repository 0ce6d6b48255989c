//! Per-service worker pool: a FIFO of tasks, a condition variable, and a
//! pause flag. Workers block on the queue, run one task at a time and hand
//! the outcome back to the parser for routing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::core::Core;
use crate::parser::task::{ParseTask, TaskStatus};
use crate::parser::Parser;

/// One stage of the parsing pipeline.
pub trait ParserService: Send + Sync {
    fn name(&self) -> &'static str;
    /// Bit this service sets in the task's completed-step mask.
    fn step(&self) -> u8;
    fn nb_threads(&self) -> usize {
        1
    }
    /// Service-specific initialization; returning false disables the
    /// pipeline.
    fn initialize(&self, _core: &Arc<Core>) -> bool {
        true
    }
    fn run(&self, core: &Arc<Core>, task: &mut ParseTask) -> TaskStatus;
    fn is_completed(&self, task: &ParseTask) -> bool {
        task.is_step_completed(self.step())
    }
}

struct QueueState {
    tasks: VecDeque<Box<ParseTask>>,
    paused: bool,
    stopped: bool,
}

struct WorkerShared {
    state: Mutex<QueueState>,
    cond: Condvar,
    active: AtomicUsize,
}

/// Queue plus worker threads for a single service.
pub struct ServiceWorker {
    core: Arc<Core>,
    service: Arc<dyn ParserService>,
    service_index: usize,
    parser: Weak<Parser>,
    shared: Arc<WorkerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceWorker {
    pub fn new(
        core: Arc<Core>,
        service: Arc<dyn ParserService>,
        service_index: usize,
        parser: Weak<Parser>,
    ) -> Self {
        Self {
            core,
            service,
            service_index,
            parser,
            shared: Arc::new(WorkerShared {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    paused: false,
                    stopped: false,
                }),
                cond: Condvar::new(),
                active: AtomicUsize::new(0),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn service(&self) -> &Arc<dyn ParserService> {
        &self.service
    }

    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        debug_assert!(threads.is_empty());
        for worker_index in 0..self.service.nb_threads().max(1) {
            let this = Arc::clone(self);
            let name = format!("{}-{}", self.service.name(), worker_index);
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || this.mainloop())
                .expect("failed to spawn parser worker thread");
            threads.push(handle);
        }
    }

    /// Enqueue at the tail.
    pub fn push(&self, task: Box<ParseTask>) {
        let mut state = self.shared.state.lock();
        state.tasks.push_back(task);
        self.shared.cond.notify_one();
    }

    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        state.paused = false;
        self.shared.cond.notify_all();
    }

    /// Drop every queued task. On-disk task rows are untouched and can be
    /// rehydrated later.
    pub fn flush(&self) -> usize {
        let mut state = self.shared.state.lock();
        let dropped = state.tasks.len();
        state.tasks.clear();
        dropped
    }

    pub fn signal_stop(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        self.shared.cond.notify_all();
    }

    pub fn stop(&self) {
        self.signal_stop();
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.tasks.is_empty() && self.shared.active.load(Ordering::SeqCst) == 0
    }

    fn mainloop(self: Arc<Self>) {
        info!(service = self.service.name(), "entering parser service thread");
        loop {
            let mut task = {
                let mut state = self.shared.state.lock();
                while (state.tasks.is_empty() || state.paused) && !state.stopped {
                    self.shared.cond.wait(&mut state);
                }
                if state.stopped {
                    break;
                }
                self.shared.active.fetch_add(1, Ordering::SeqCst);
                state.tasks.pop_front().expect("queue cannot be empty here")
            };
            // Count the attempt before running, so a crash mid-parse still
            // consumes retry budget on the next restore.
            if let Err(err) = task.start_parser_step(&self.core) {
                debug!(mrl = %task.mrl, "failed to record parse attempt: {}", err);
            }
            let status = self.service.run(&self.core, &mut task);
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
            debug!(
                service = self.service.name(),
                mrl = %task.mrl,
                ?status,
                "task step finished"
            );
            if let Some(parser) = self.parser.upgrade() {
                parser.done(task, status, self.service_index);
            }
        }
        info!(service = self.service.name(), "exiting parser service thread");
    }
}

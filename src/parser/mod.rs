//! Multi-stage parse pipeline.
//!
//! Services run in a fixed order per task — probe, metadata, thumbnailer —
//! while distinct tasks flow through the stages concurrently. Progress is
//! persisted per task, so a restart resumes where it left off.

pub mod metadata;
pub mod probe;
pub mod service;
pub mod task;
pub mod thumbnailer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::core::Core;
use crate::parser::service::{ParserService, ServiceWorker};
use crate::parser::task::{ParseTask, TaskStatus, MAX_RETRIES};

/// The default pipeline, in execution order.
pub fn default_services() -> Vec<Arc<dyn ParserService>> {
    vec![
        Arc::new(probe::ProbeService),
        Arc::new(metadata::MetadataParserService),
        Arc::new(thumbnailer::ThumbnailerService),
    ]
}

pub struct Parser {
    core: Arc<Core>,
    workers: Vec<Arc<ServiceWorker>>,
    ops_scheduled: AtomicUsize,
    ops_done: AtomicUsize,
    last_percent: AtomicUsize,
}

impl Parser {
    pub fn new(core: Arc<Core>, services: Vec<Arc<dyn ParserService>>) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let workers = services
                .into_iter()
                .enumerate()
                .map(|(index, service)| {
                    Arc::new(ServiceWorker::new(
                        Arc::clone(&core),
                        service,
                        index,
                        weak.clone(),
                    ))
                })
                .collect();
            Parser {
                core,
                workers,
                ops_scheduled: AtomicUsize::new(0),
                ops_done: AtomicUsize::new(0),
                last_percent: AtomicUsize::new(0),
            }
        })
    }

    /// Initialize every service and spawn the worker threads.
    pub fn start(&self) -> bool {
        for worker in &self.workers {
            if !worker.service().initialize(&self.core) {
                error!(
                    service = worker.service().name(),
                    "parser service failed to initialize"
                );
                return false;
            }
        }
        for worker in &self.workers {
            worker.start();
        }
        true
    }

    fn remaining_steps(&self, task: &ParseTask) -> usize {
        self.workers
            .iter()
            .filter(|w| !w.service().is_completed(task))
            .count()
    }

    /// Feed a task into the pipeline, skipping already-completed steps.
    pub fn parse(&self, task: Box<ParseTask>) {
        let remaining = self.remaining_steps(&task);
        if remaining == 0 {
            return;
        }
        let scheduled = self.ops_scheduled.load(Ordering::SeqCst);
        if scheduled == self.ops_done.load(Ordering::SeqCst) {
            self.core.on_parser_idle_changed(false);
        }
        self.ops_scheduled.fetch_add(remaining, Ordering::SeqCst);
        self.dispatch(task, 0);
    }

    fn dispatch(&self, task: Box<ParseTask>, from_index: usize) {
        for worker in self.workers.iter().skip(from_index) {
            if !worker.service().is_completed(&task) {
                worker.push(task);
                return;
            }
        }
    }

    /// Routing callback invoked by the workers after each service run.
    pub(crate) fn done(&self, task: Box<ParseTask>, status: TaskStatus, service_index: usize) {
        match status {
            TaskStatus::Success => {
                self.ops_done.fetch_add(1, Ordering::SeqCst);
                if !task.is_completed() {
                    self.dispatch(task, service_index + 1);
                }
            }
            TaskStatus::Error => {
                if task.retry_count >= MAX_RETRIES {
                    warn!(mrl = %task.mrl, "task exhausted its retries, parking it");
                    let remaining = self.remaining_steps(&task);
                    self.ops_done.fetch_add(remaining, Ordering::SeqCst);
                } else {
                    self.workers[service_index].push(task);
                }
            }
            TaskStatus::Fatal => {
                error!(mrl = %task.mrl, "task failed fatally");
                let remaining = self.remaining_steps(&task);
                self.ops_done.fetch_add(remaining, Ordering::SeqCst);
            }
        }
        self.update_stats();
    }

    fn update_stats(&self) {
        let done = self.ops_done.load(Ordering::SeqCst);
        let scheduled = self.ops_scheduled.load(Ordering::SeqCst);
        if scheduled == 0 {
            return;
        }
        if done >= scheduled {
            self.ops_done.store(0, Ordering::SeqCst);
            self.ops_scheduled.store(0, Ordering::SeqCst);
            self.last_percent.store(100, Ordering::SeqCst);
            if let Some(cb) = self.core.callback() {
                cb.on_parsing_stats_updated(100);
            }
            self.core.on_parser_idle_changed(true);
            return;
        }
        let percent = (done * 100 / scheduled) as u32;
        if self.last_percent.swap(percent as usize, Ordering::SeqCst) != percent as usize {
            if let Some(cb) = self.core.callback() {
                cb.on_parsing_stats_updated(percent);
            }
        }
    }

    /// Rehydrate unfinished tasks from disk into the queues.
    pub fn restore(&self) {
        let tasks = match ParseTask::fetch_unparsed(&self.core) {
            Ok(tasks) => tasks,
            Err(err) => {
                error!("failed to fetch unparsed tasks: {}", err);
                return;
            }
        };
        for mut task in tasks {
            match task.restore_linked_entities(&self.core) {
                Ok(true) => self.parse(task),
                Ok(false) => warn!(mrl = %task.mrl, "skipping unrestorable task"),
                Err(err) => warn!(mrl = %task.mrl, "failed to restore task: {}", err),
            }
        }
    }

    pub fn pause(&self) {
        for worker in &self.workers {
            worker.pause();
        }
    }

    pub fn resume(&self) {
        for worker in &self.workers {
            worker.resume();
        }
    }

    /// Drop all in-memory queues; the persisted tasks remain and can be
    /// restored.
    pub fn flush(&self) {
        for worker in &self.workers {
            worker.flush();
        }
        self.ops_scheduled.store(0, Ordering::SeqCst);
        self.ops_done.store(0, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        self.workers.iter().all(|w| w.is_idle())
    }

    pub fn stop(&self) {
        for worker in &self.workers {
            worker.signal_stop();
        }
        for worker in &self.workers {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entity::DatabaseEntity;
    use crate::fs::FsFactory;
    use crate::model::album_track::AlbumTrack;
    use crate::model::artist::UNKNOWN_ARTIST_ID;
    use crate::model::file::File;
    use crate::model::MediaType;
    use crate::parser::task::step;
    use crate::test_utils::TestLibrary;
    use std::time::{Duration, Instant};

    fn make_task(t: &TestLibrary, file_mrl: &str) -> Box<ParseTask> {
        let folder = t.ensure_folder(&crate::utils::mrl::directory(file_mrl));
        let fs_file = t.fs.add_file(file_mrl, 1000, 10).unwrap();
        let dir_fs = t
            .fs
            .create_directory(&crate::utils::mrl::directory(file_mrl))
            .unwrap();
        ParseTask::create(t.core(), fs_file, folder, dir_fs, None).unwrap()
    }

    fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn services_run_in_order_and_persist_progress() {
        let t = TestLibrary::new();
        let mut task = make_task(&t, "file:///music/full.mp3");

        let probe = probe::ProbeService;
        assert_eq!(probe.run(t.core(), &mut task), TaskStatus::Success);
        assert!(task.is_step_completed(step::PROBE));
        let media = task.media.clone().expect("probe creates the media row");
        assert_eq!(media.read().media_type(), MediaType::Audio);
        let file = task.file.clone().expect("probe creates the file row");
        assert_eq!(file.read().media_id(), Some(media.read().id()));

        let metadata = metadata::MetadataParserService;
        assert_eq!(metadata.run(t.core(), &mut task), TaskStatus::Success);
        assert!(task.is_step_completed(step::METADATA));
        // Without tags the track lands on the unknown artist.
        let track = AlbumTrack::from_media(t.core(), media.read().id())
            .unwrap()
            .expect("audio media gets an album track");
        assert_eq!(track.read().artist_id(), Some(UNKNOWN_ARTIST_ID));

        let thumbnailer = thumbnailer::ThumbnailerService;
        assert_eq!(thumbnailer.run(t.core(), &mut task), TaskStatus::Success);
        assert!(task.is_completed());
        assert!(ParseTask::fetch_unparsed(t.core()).unwrap().is_empty());
    }

    #[test]
    fn interrupted_tasks_resume_where_they_stopped() {
        let t = TestLibrary::new();
        let mut task = make_task(&t, "file:///music/partial.mp3");
        let probe = probe::ProbeService;
        assert_eq!(probe.run(t.core(), &mut task), TaskStatus::Success);
        let media_id = task.media.as_ref().unwrap().read().id();
        drop(task);
        t.ml.clear_cache();

        // Simulate a restart: rehydrate from disk.
        let mut unparsed = ParseTask::fetch_unparsed(t.core()).unwrap();
        assert_eq!(unparsed.len(), 1);
        let task = &mut unparsed[0];
        assert!(task.is_step_completed(step::PROBE));
        assert!(!task.is_step_completed(step::METADATA));
        assert!(task.restore_linked_entities(t.core()).unwrap());
        assert_eq!(task.media.as_ref().unwrap().read().id(), media_id);
    }

    #[test]
    fn worker_pipeline_completes_tasks() {
        let t = TestLibrary::new();
        let parser = Parser::new(t.core().clone(), default_services());
        assert!(parser.start());
        *t.core().parser.write() = Some(parser.clone());

        parser.parse(make_task(&t, "file:///music/threaded.mp3"));
        wait_for("the pipeline to drain", || {
            parser.is_idle() && ParseTask::fetch_unparsed(t.core()).unwrap().is_empty()
        });
        let file = File::from_mrl(t.core(), "file:///music/threaded.mp3")
            .unwrap()
            .expect("the probe stage catalogued the file");
        let media = file.read().media(t.core()).unwrap().unwrap();
        assert_eq!(media.read().media_type(), MediaType::Audio);
    }

    #[test]
    fn pause_holds_tasks_until_resume() {
        let t = TestLibrary::new();
        let parser = Parser::new(t.core().clone(), default_services());
        assert!(parser.start());
        parser.pause();

        parser.parse(make_task(&t, "file:///music/later.mp3"));
        std::thread::sleep(Duration::from_millis(100));
        assert!(File::from_mrl(t.core(), "file:///music/later.mp3")
            .unwrap()
            .is_none());

        parser.resume();
        wait_for("the paused task to complete", || {
            ParseTask::fetch_unparsed(t.core()).unwrap().is_empty()
        });
        parser.stop();
    }

    #[test]
    fn flushed_queues_can_be_restored_from_disk() {
        let t = TestLibrary::new();
        let parser = Parser::new(t.core().clone(), default_services());
        assert!(parser.start());
        parser.pause();
        parser.parse(make_task(&t, "file:///music/flushed.mp3"));
        parser.flush();
        parser.resume();
        std::thread::sleep(Duration::from_millis(100));
        // Nothing ran; the task only exists on disk.
        assert_eq!(ParseTask::fetch_unparsed(t.core()).unwrap().len(), 1);

        parser.restore();
        wait_for("the restored task to complete", || {
            ParseTask::fetch_unparsed(t.core()).unwrap().is_empty()
        });
        parser.stop();
    }

    struct AlwaysFailing;

    impl ParserService for AlwaysFailing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn step(&self) -> u8 {
            step::PROBE
        }

        fn run(&self, _core: &std::sync::Arc<crate::core::Core>, _task: &mut ParseTask) -> TaskStatus {
            TaskStatus::Error
        }
    }

    #[test]
    fn erroring_tasks_are_retried_then_parked() {
        let t = TestLibrary::new();
        let services: Vec<Arc<dyn ParserService>> = vec![Arc::new(AlwaysFailing)];
        let parser = Parser::new(t.core().clone(), services);
        assert!(parser.start());
        parser.parse(make_task(&t, "file:///music/cursed.mp3"));
        wait_for("the task to exhaust its retries", || {
            parser.is_idle()
                && t.core()
                    .db
                    .reader()
                    .unwrap()
                    .query_row(
                        "SELECT retry_count FROM ParseTask WHERE mrl = ?",
                        ["file:///music/cursed.mp3"],
                        |r| r.get::<_, i64>(0),
                    )
                    .unwrap()
                    >= MAX_RETRIES
        });
        // The step never completed and the task is no longer eligible.
        assert!(ParseTask::fetch_unparsed(t.core()).unwrap().is_empty());
        parser.stop();
    }
}

//! The public library facade: lifecycle, queries and commands.
//!
//! `initialize` opens the database, runs migrations (recreating the file
//! when an upgrade is impossible), wires the notifier and cache-eviction
//! hooks, then `start` brings up the background workers.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::callbacks::{InitResult, LibraryCallback};
use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::db::migrations::{self, MigrationOutcome};
use crate::db::{schema, SqlStore};
use crate::discoverer::DiscovererWorker;
use crate::error::{Error, Result};
use crate::fs::local::{DefaultDeviceLister, LocalFsFactory};
use crate::fs::{DeviceLister, FsFactory, VideoFrameExtractor};
use crate::model::album::{Album, AlbumPtr};
use crate::model::artist::{Artist, ArtistPtr};
use crate::model::device::Device;
use crate::model::file::File;
use crate::model::folder::{BannedType, Folder, FolderPtr};
use crate::model::genre::{Genre, GenrePtr};
use crate::model::history::{History, HistoryPtr};
use crate::model::label::{Label, LabelPtr};
use crate::model::media::{Media, MediaPtr};
use crate::model::movie::{Movie, MoviePtr};
use crate::model::playlist::{Playlist, PlaylistPtr};
use crate::model::settings::Settings;
use crate::model::show::{Show, ShowPtr};
use crate::model::{
    validate_search_pattern, FileType, MediaSearchAggregate, MediaSubType, MediaType,
    SearchAggregate, SortingCriteria,
};
use crate::notifier::{ChangeType, EntityKind, NotifierHub};
use crate::parser::task::ParseTask;
use crate::parser::{default_services, Parser};
use crate::utils::mrl;

enum DbLocation {
    OnDisk(PathBuf),
    InMemory,
}

pub struct MediaLibrary {
    core: Option<Arc<Core>>,
    discoverer: Option<Arc<DiscovererWorker>>,
    db_location: Option<DbLocation>,
    device_lister: Option<Arc<dyn DeviceLister>>,
    network_factory: Option<Arc<dyn FsFactory>>,
    local_factory_override: Option<Arc<dyn FsFactory>>,
    initialized: bool,
    started: bool,
}

impl Default for MediaLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self {
            core: None,
            discoverer: None,
            db_location: None,
            device_lister: None,
            network_factory: None,
            local_factory_override: None,
            initialized: false,
            started: false,
        }
    }

    /// Must be called before `initialize`.
    pub fn set_device_lister(&mut self, lister: Arc<dyn DeviceLister>) {
        debug_assert!(!self.initialized);
        self.device_lister = Some(lister);
    }

    /// Replace the pre-installed local filesystem factory. Must be called
    /// before `initialize`; used by tests and embedders with their own
    /// filesystem view.
    pub fn set_fs_factory(&mut self, factory: Arc<dyn FsFactory>) {
        debug_assert!(!self.initialized);
        self.local_factory_override = Some(factory);
    }

    /// Register the network filesystem implementation toggled by
    /// [`MediaLibrary::set_discover_network_enabled`].
    pub fn set_network_fs_factory(&mut self, factory: Arc<dyn FsFactory>) {
        self.network_factory = Some(factory);
    }

    /// Register the video frame renderer used for video thumbnails.
    pub fn set_video_frame_extractor(&mut self, extractor: Arc<dyn VideoFrameExtractor>) {
        if let Some(core) = &self.core {
            *core.frame_extractor.write() = Some(extractor);
        }
    }

    pub fn initialize(
        &mut self,
        db_path: &str,
        thumbnail_dir: &str,
        callback: Option<Arc<dyn LibraryCallback>>,
    ) -> InitResult {
        self.initialize_at(
            DbLocation::OnDisk(PathBuf::from(db_path)),
            thumbnail_dir,
            callback,
        )
    }

    /// In-memory variant, for tests and throwaway catalogs.
    pub fn initialize_in_memory(
        &mut self,
        thumbnail_dir: &str,
        callback: Option<Arc<dyn LibraryCallback>>,
    ) -> InitResult {
        self.initialize_at(DbLocation::InMemory, thumbnail_dir, callback)
    }

    fn initialize_at(
        &mut self,
        location: DbLocation,
        thumbnail_dir: &str,
        callback: Option<Arc<dyn LibraryCallback>>,
    ) -> InitResult {
        info!("initializing medialibrary");
        if self.initialized {
            info!("already initialized");
            return InitResult::AlreadyInitialized;
        }
        if let Err(err) = std::fs::create_dir_all(thumbnail_dir) {
            error!("failed to create thumbnail directory: {}", err);
            return InitResult::Failed;
        }
        self.db_location = Some(location);

        let store = match self.open_store() {
            Ok(store) => store,
            Err(err) => {
                error!("failed to open the database: {}", err);
                return InitResult::Failed;
            }
        };
        let core = Arc::new(Core::new(store));
        *core.thumbnail_dir.write() = PathBuf::from(thumbnail_dir);
        *core.callback.write() = callback.clone();
        let lister = self
            .device_lister
            .get_or_insert_with(|| Arc::new(DefaultDeviceLister) as Arc<dyn DeviceLister>)
            .clone();
        *core.device_lister.write() = Some(lister.clone());
        let local_factory: Arc<dyn FsFactory> = match &self.local_factory_override {
            Some(factory) => factory.clone(),
            None => Arc::new(LocalFsFactory::new(lister)),
        };
        core.fs_factories.write().push(local_factory);
        self.core = Some(Arc::clone(&core));

        // A notifier only exists when the host gave us a callback; without
        // one there is nobody to notify and no hooks are installed.
        if let Some(callback) = callback {
            let notifier = NotifierHub::new(callback);
            notifier.start();
            *core.notifier.write() = Some(notifier);
            Self::register_entity_hooks(&core);
        }

        let mut result = InitResult::Success;
        let mut settings = match self.create_schema(&core) {
            Ok(settings) => settings,
            Err(err) => {
                error!("failed to initialize the database schema: {}", err);
                return InitResult::Failed;
            }
        };

        match self.update_database_model(&core, &mut settings) {
            Ok(InitResult::Failed) | Err(_) => {
                error!("failed to update the database model");
                return InitResult::Failed;
            }
            Ok(outcome) => {
                if outcome == InitResult::DbReset {
                    result = InitResult::DbReset;
                }
            }
        }

        self.initialized = true;
        info!("successfully initialized");
        result
    }

    fn open_store(&self) -> Result<SqlStore> {
        match self.db_location.as_ref().expect("location is set first") {
            DbLocation::OnDisk(path) => SqlStore::open(path),
            DbLocation::InMemory => SqlStore::open_in_memory(),
        }
    }

    fn create_schema(&self, core: &Arc<Core>) -> Result<Settings> {
        core.db.transaction(|conn| {
            schema::create_all_tables(conn)?;
            let settings = Settings::load(&core.db)?;
            schema::create_all_triggers(conn, settings.db_model_version())?;
            Ok(settings)
        })
    }

    /// Migration policy: three upgrade attempts, then three
    /// drop-and-recreate attempts, then give up.
    fn update_database_model(
        &mut self,
        core: &Arc<Core>,
        settings: &mut Settings,
    ) -> Result<InitResult> {
        if settings.db_model_version() == crate::model::settings::DB_MODEL_VERSION {
            return Ok(InitResult::Success);
        }
        for attempt in 0..3u32 {
            match migrations::upgrade_model(core, settings) {
                Ok(MigrationOutcome::UpToDate) => return Ok(InitResult::Success),
                Ok(MigrationOutcome::Upgraded { rescan }) => {
                    if rescan {
                        self.force_rescan_core(core)?;
                    }
                    return Ok(InitResult::Success);
                }
                Ok(MigrationOutcome::NeedsReset) => break,
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        "database upgrade failed, retrying: {}", err
                    );
                }
            }
        }
        error!("failed to upgrade the database, recreating it");
        for attempt in 0..3u32 {
            match self.recreate_database(core.thumbnail_dir()) {
                Ok(()) => return Ok(InitResult::DbReset),
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        "failed to recreate the database, retrying: {}", err
                    );
                }
            }
        }
        Ok(InitResult::Failed)
    }

    /// Close every connection, delete the database file and rebuild an
    /// empty schema. The core is replaced wholesale; nothing else holds a
    /// reference to it this early in the lifecycle.
    fn recreate_database(&mut self, thumbnail_dir: PathBuf) -> Result<()> {
        let previous = self.core.take().expect("initialize builds the core first");
        let callback = previous.callback();
        if let Some(notifier) = previous.notifier() {
            notifier.stop();
        }
        let fs_factories = previous.fs_factories.read().clone();
        let device_lister = previous.device_lister.read().clone();
        drop(previous);

        if let Some(DbLocation::OnDisk(path)) = self.db_location.as_ref() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        let store = self.open_store()?;
        let core = Arc::new(Core::new(store));
        *core.thumbnail_dir.write() = thumbnail_dir;
        *core.callback.write() = callback.clone();
        *core.fs_factories.write() = fs_factories;
        *core.device_lister.write() = device_lister;
        if let Some(callback) = callback {
            let notifier = NotifierHub::new(callback);
            notifier.start();
            *core.notifier.write() = Some(notifier);
            Self::register_entity_hooks(&core);
        }
        self.create_schema(&core)?;
        self.core = Some(core);
        Ok(())
    }

    /// Wire cache eviction and change notifications to the database's
    /// update hooks.
    fn register_entity_hooks(core: &Arc<Core>) {
        let notifier = match core.notifier() {
            Some(n) => n,
            None => return,
        };
        let notifiable = [
            ("Media", EntityKind::Media),
            ("Album", EntityKind::Album),
            ("Artist", EntityKind::Artist),
            ("AlbumTrack", EntityKind::Track),
            ("Playlist", EntityKind::Playlist),
        ];
        for (table, kind) in notifiable {
            let weak = Arc::downgrade(core);
            let hub = Arc::clone(&notifier);
            core.db.register_update_hook(table, move |reason, rowid| {
                let change = match reason {
                    crate::db::HookReason::Insert => ChangeType::Added,
                    crate::db::HookReason::Update => ChangeType::Modified,
                    crate::db::HookReason::Delete => {
                        if let Some(core) = weak.upgrade() {
                            evict(&core, table, rowid);
                        }
                        ChangeType::Deleted
                    }
                };
                hub.notify(kind, change, rowid);
            });
        }
        let eviction_only = [
            "Device",
            "File",
            "Folder",
            "Genre",
            "Label",
            "Movie",
            "Show",
            "ShowEpisode",
            "AudioTrack",
            "History",
        ];
        for table in eviction_only {
            let weak = Arc::downgrade(core);
            core.db.register_update_hook(table, move |reason, rowid| {
                if reason == crate::db::HookReason::Delete {
                    if let Some(core) = weak.upgrade() {
                        evict(&core, table, rowid);
                    }
                }
            });
        }
    }

    /// Bring up the background workers. Must follow a successful
    /// `initialize`.
    pub fn start(&mut self) -> bool {
        assert!(self.initialized);
        if self.started {
            return false;
        }
        let core = Arc::clone(self.core.as_ref().expect("initialized implies a core"));
        for factory in core.fs_factories.read().iter() {
            if let Err(err) = refresh_devices(&core, factory.as_ref()) {
                warn!("failed to refresh devices: {}", err);
            }
        }

        let parser = Parser::new(Arc::clone(&core), default_services());
        if !parser.start() {
            return false;
        }
        parser.restore();
        *core.parser.write() = Some(Arc::clone(&parser));

        let discoverer = Arc::new(DiscovererWorker::new(Arc::clone(&core)));
        discoverer.start();
        self.discoverer = Some(discoverer);
        self.started = true;
        true
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        self.core.as_ref().expect("the library is not initialized")
    }

    /// Live cache handle for tests and diagnostics: drops every cached
    /// entity instance.
    pub fn clear_cache(&self) {
        if let Some(core) = &self.core {
            core.cache.clear();
        }
    }

    // ---- Entry points ----------------------------------------------------

    pub fn discover(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.discover(entry_point);
        }
    }

    pub fn reload(&self) {
        if let Some(worker) = &self.discoverer {
            worker.reload_all();
        }
    }

    pub fn reload_entry_point(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.reload(entry_point);
        }
    }

    pub fn remove_entry_point(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.remove(entry_point);
        }
    }

    pub fn ban_folder(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.ban(entry_point);
        }
    }

    pub fn unban_folder(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.unban(entry_point);
        }
    }

    pub fn entry_points(&self) -> Vec<FolderPtr> {
        Folder::entry_points(self.core()).unwrap_or_default()
    }

    pub fn folder(&self, target: &str) -> Option<FolderPtr> {
        Folder::from_mrl(self.core(), target, BannedType::Any).unwrap_or(None)
    }

    // ---- Media -----------------------------------------------------------

    pub fn media(&self, media_id: i64) -> Option<MediaPtr> {
        Media::fetch(self.core(), media_id).unwrap_or(None)
    }

    /// Resolve an MRL to a catalogued media: external files first, then
    /// the discovered tree.
    pub fn media_from_mrl(&self, target: &str) -> Option<MediaPtr> {
        let core = self.core();
        info!(mrl = %target, "fetching media from mrl");
        if let Ok(Some(file)) = File::from_external_mrl(core, target) {
            return file.read().media(core).unwrap_or(None);
        }
        let factory = core.fs_factory_for_mrl(target)?;
        let device = factory.create_device_from_mrl(target)?;
        let file = if !device.is_removable() {
            File::from_mrl(core, target).ok()??
        } else {
            let folder = Folder::from_mrl(core, &mrl::directory(target), BannedType::Any)
                .ok()??;
            if !folder.read().is_present() {
                info!(mrl = %target, "found a folder containing the mrl but it is not present");
                return None;
            }
            let folder_id = folder.read().id();
            File::from_file_name(core, mrl::file_name(target), folder_id).ok()??
        };
        let media = file.read().media(core).unwrap_or(None);
        media
    }

    /// Register an external media (a stream, or a file outside every entry
    /// point).
    pub fn add_media(&self, target: &str) -> Option<MediaPtr> {
        let core = self.core();
        let created = core.db.with_retries(3, || {
            core.db.transaction(|_| {
                let media = Media::create(core, MediaType::External, mrl::file_name(target))?;
                let media_id = media.read().id();
                match Media::add_external_mrl(core, media_id, target, FileType::Main)? {
                    Some(_) => Ok(media),
                    None => {
                        // Roll the media row back rather than leaving an
                        // entry with no file behind.
                        core.cache.media.remove(media_id);
                        Err(Error::Generic(format!("{} is already catalogued", target)))
                    }
                }
            })
        });
        match created {
            Ok(media) => Some(media),
            Err(err) => {
                error!("failed to create external media: {}", err);
                None
            }
        }
    }

    /// Register a p2p media entry backed by a transport MRL. The media row
    /// is saved before the MRL is attached; the transaction keeps the pair
    /// atomic either way.
    pub fn add_p2p_media(
        &self,
        parent_media_id: Option<i64>,
        media_type: MediaType,
        title: &str,
        target: &str,
    ) -> Option<MediaPtr> {
        let core = self.core();
        let created = core.db.with_retries(3, || {
            core.db.transaction(|_| {
                let media = Media::create(core, media_type, title)?;
                {
                    let mut media = media.write();
                    if let Some(parent) = parent_media_id {
                        media.set_parent_media(core, parent)?;
                    }
                    media.set_p2p(core, true)?;
                }
                let media_id = media.read().id();
                match Media::add_external_mrl(core, media_id, target, FileType::Main)? {
                    Some(_) => Ok(media),
                    None => {
                        core.cache.media.remove(media_id);
                        Err(Error::Generic(format!("{} is already catalogued", target)))
                    }
                }
            })
        });
        match created {
            Ok(media) => Some(media),
            Err(err) => {
                error!("failed to create p2p media: {}", err);
                None
            }
        }
    }

    pub fn delete_media(&self, media_id: i64) -> bool {
        match Media::destroy(self.core(), media_id) {
            Ok(deleted) => deleted,
            Err(err) => {
                error!("failed to delete media: {}", err);
                false
            }
        }
    }

    pub fn audio_files(
        &self,
        p2p: Option<bool>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Vec<MediaPtr> {
        Media::list_audio(self.core(), p2p, sort, desc).unwrap_or_default()
    }

    pub fn video_files(
        &self,
        p2p: Option<bool>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Vec<MediaPtr> {
        Media::list_video(self.core(), p2p, sort, desc).unwrap_or_default()
    }

    // ---- Albums / artists / genres / playlists / labels ------------------

    pub fn album(&self, album_id: i64) -> Option<AlbumPtr> {
        Album::fetch(self.core(), album_id).unwrap_or(None)
    }

    pub fn create_album(&self, title: &str) -> Option<AlbumPtr> {
        Album::create(self.core(), title, None).ok()
    }

    pub fn albums(&self, sort: SortingCriteria, desc: bool) -> Vec<AlbumPtr> {
        Album::list_all(self.core(), sort, desc).unwrap_or_default()
    }

    pub fn artist(&self, artist_id: i64) -> Option<ArtistPtr> {
        Artist::fetch(self.core(), artist_id).unwrap_or(None)
    }

    pub fn artist_by_name(&self, name: &str) -> Option<ArtistPtr> {
        Artist::by_name(self.core(), name).unwrap_or(None)
    }

    pub fn create_artist(&self, name: &str) -> Option<ArtistPtr> {
        let core = self.core();
        match Artist::create(core, name) {
            Ok(artist) => Some(artist),
            Err(err) if err.is_constraint() => {
                warn!(
                    "constraint violation while creating artist ({}), fetching it instead",
                    err
                );
                Artist::by_name(core, name).unwrap_or(None)
            }
            Err(err) => {
                error!("failed to create artist: {}", err);
                None
            }
        }
    }

    pub fn artists(&self, include_all: bool, sort: SortingCriteria, desc: bool) -> Vec<ArtistPtr> {
        Artist::list_all(self.core(), include_all, sort, desc).unwrap_or_default()
    }

    pub fn genre(&self, genre_id: i64) -> Option<GenrePtr> {
        Genre::fetch(self.core(), genre_id).unwrap_or(None)
    }

    pub fn create_genre(&self, name: &str) -> Option<GenrePtr> {
        Genre::from_name(self.core(), name).ok()
    }

    pub fn genres(&self, sort: SortingCriteria, desc: bool) -> Vec<GenrePtr> {
        Genre::list_all(self.core(), sort, desc).unwrap_or_default()
    }

    pub fn playlist(&self, playlist_id: i64) -> Option<PlaylistPtr> {
        Playlist::fetch(self.core(), playlist_id).unwrap_or(None)
    }

    pub fn create_playlist(&self, name: &str) -> Option<PlaylistPtr> {
        match Playlist::create(self.core(), name) {
            Ok(playlist) => Some(playlist),
            Err(err) => {
                error!("failed to create a playlist: {}", err);
                None
            }
        }
    }

    pub fn playlists(&self, sort: SortingCriteria, desc: bool) -> Vec<PlaylistPtr> {
        Playlist::list_all(self.core(), sort, desc).unwrap_or_default()
    }

    pub fn delete_playlist(&self, playlist_id: i64) -> bool {
        match Playlist::destroy(self.core(), playlist_id) {
            Ok(deleted) => deleted,
            Err(err) => {
                error!("failed to delete playlist: {}", err);
                false
            }
        }
    }

    pub fn create_label(&self, name: &str) -> Option<LabelPtr> {
        match Label::create(self.core(), name) {
            Ok(label) => Some(label),
            Err(err) => {
                error!("failed to create a label: {}", err);
                None
            }
        }
    }

    pub fn delete_label(&self, label: &LabelPtr) -> bool {
        let label_id = label.read().id();
        match Label::destroy(self.core(), label_id) {
            Ok(deleted) => deleted,
            Err(err) => {
                error!("failed to delete label: {}", err);
                false
            }
        }
    }

    pub fn set_media_favorite(&self, media_id: i64, favorite: bool) -> bool {
        match self.media(media_id) {
            Some(media) => media.write().set_favorite(self.core(), favorite).is_ok(),
            None => false,
        }
    }

    pub fn show(&self, name: &str) -> Option<ShowPtr> {
        Show::by_name(self.core(), name).unwrap_or(None)
    }

    pub fn create_show(&self, name: &str) -> Option<ShowPtr> {
        Show::create(self.core(), name).ok()
    }

    pub fn movie(&self, title: &str) -> Option<MoviePtr> {
        Movie::by_title(self.core(), title).unwrap_or(None)
    }

    pub fn create_movie(&self, media_id: i64, title: &str) -> Option<MoviePtr> {
        let core = self.core();
        let movie = Movie::create(core, media_id, title).ok()?;
        if let Some(media) = self.media(media_id) {
            let mut media = media.write();
            if media.set_subtype(core, MediaSubType::Movie).is_err() {
                return None;
            }
        }
        Some(movie)
    }

    // ---- Search ----------------------------------------------------------

    pub fn search_media(&self, pattern: &str) -> MediaSearchAggregate {
        if !validate_search_pattern(pattern) {
            return MediaSearchAggregate::default();
        }
        let mut aggregate = MediaSearchAggregate::default();
        for media in Media::search(self.core(), pattern).unwrap_or_default() {
            let subtype = media.read().subtype();
            match subtype {
                MediaSubType::AlbumTrack => aggregate.tracks.push(media),
                MediaSubType::Movie => aggregate.movies.push(media),
                MediaSubType::ShowEpisode => aggregate.episodes.push(media),
                MediaSubType::Unknown => aggregate.others.push(media),
            }
        }
        aggregate
    }

    pub fn search_albums(&self, pattern: &str) -> Vec<AlbumPtr> {
        if !validate_search_pattern(pattern) {
            return Vec::new();
        }
        Album::search(self.core(), pattern).unwrap_or_default()
    }

    pub fn search_artists(&self, pattern: &str) -> Vec<ArtistPtr> {
        if !validate_search_pattern(pattern) {
            return Vec::new();
        }
        Artist::search(self.core(), pattern).unwrap_or_default()
    }

    pub fn search_genres(&self, pattern: &str) -> Vec<GenrePtr> {
        if !validate_search_pattern(pattern) {
            return Vec::new();
        }
        Genre::search(self.core(), pattern).unwrap_or_default()
    }

    pub fn search_playlists(&self, pattern: &str) -> Vec<PlaylistPtr> {
        if !validate_search_pattern(pattern) {
            return Vec::new();
        }
        Playlist::search(self.core(), pattern).unwrap_or_default()
    }

    pub fn search(&self, pattern: &str) -> SearchAggregate {
        SearchAggregate {
            media: self.search_media(pattern),
            albums: self.search_albums(pattern),
            artists: self.search_artists(pattern),
            genres: self.search_genres(pattern),
            playlists: self.search_playlists(pattern),
        }
    }

    // ---- History ---------------------------------------------------------

    pub fn add_to_stream_history(&self, media: &MediaPtr) -> bool {
        let media_id = media.read().id();
        match History::insert_media(self.core(), media_id) {
            Ok(()) => true,
            Err(err) => {
                error!("failed to add stream to history: {}", err);
                false
            }
        }
    }

    pub fn last_streams_played(&self) -> Vec<HistoryPtr> {
        History::fetch_all(self.core()).unwrap_or_default()
    }

    pub fn last_media_played(&self) -> Vec<MediaPtr> {
        Media::fetch_history(self.core()).unwrap_or_default()
    }

    pub fn clear_history(&self) -> bool {
        let core = self.core();
        let cleared = core.db.with_retries(3, || {
            core.db.transaction(|_| {
                Media::clear_history(core)?;
                History::clear_streams(core)?;
                Ok(())
            })
        });
        match cleared {
            Ok(()) => true,
            Err(err) => {
                error!("failed to clear history: {}", err);
                false
            }
        }
    }

    // ---- Background operations -------------------------------------------

    pub fn pause_background_operations(&self) {
        if let Some(parser) = self.core().parser() {
            parser.pause();
        }
    }

    pub fn resume_background_operations(&self) {
        if let Some(parser) = self.core().parser() {
            parser.resume();
        }
    }

    pub fn force_parser_retry(&self) -> bool {
        match ParseTask::reset_retry_count(self.core()) {
            Ok(()) => true,
            Err(err) => {
                error!("failed to force parser retry: {}", err);
                false
            }
        }
    }

    /// Drop all derived metadata and reparse the whole catalog.
    pub fn force_rescan(&self) {
        let core = self.core();
        if let Err(err) = self.force_rescan_core(core) {
            error!("failed to force a rescan: {}", err);
        }
    }

    fn force_rescan_core(&self, core: &Arc<Core>) -> Result<()> {
        let parser = core.parser();
        if let Some(parser) = &parser {
            parser.pause();
            parser.flush();
        }
        migrations::wipe_derived_metadata(core)?;
        if let Some(parser) = &parser {
            parser.restore();
            parser.resume();
        }
        Ok(())
    }

    pub fn reinit(&self) {
        self.clear_cache();
        self.force_rescan();
    }

    // ---- Devices ---------------------------------------------------------

    pub fn set_discover_network_enabled(&mut self, enabled: bool) {
        let core = self.core().clone();
        let mut factories = core.fs_factories.write();
        if enabled {
            if factories.iter().any(|f| f.is_network()) {
                return;
            }
            match &self.network_factory {
                Some(factory) => factories.push(Arc::clone(factory)),
                None => warn!("no network filesystem factory was registered"),
            }
        } else {
            factories.retain(|f| !f.is_network());
        }
    }

    /// Returns true when the device was not yet known to the library.
    pub fn on_device_plugged(&self, uuid: &str, mountpoint: &str) -> bool {
        let core = self.core();
        let existing = Device::from_uuid(core, uuid).unwrap_or(None);
        info!(uuid, mountpoint, "device was plugged and mounted");
        for factory in core.fs_factories.read().iter() {
            if factory.is_mrl_supported("file://") {
                factory.refresh_devices();
                break;
            }
        }
        if let Some(device) = &existing {
            if let Err(err) = device.write().set_present(core, true) {
                error!("failed to mark device as present: {}", err);
            }
        }
        existing.is_none()
    }

    pub fn on_device_unplugged(&self, uuid: &str) {
        let core = self.core();
        let device = match Device::from_uuid(core, uuid).unwrap_or(None) {
            Some(d) => d,
            None => {
                warn!(uuid, "unknown device was unplugged, ignoring");
                return;
            }
        };
        debug_assert!(device.read().is_removable());
        info!(uuid, "device was unplugged");
        for factory in core.fs_factories.read().iter() {
            if factory.is_mrl_supported("file://") {
                factory.refresh_devices();
            }
        }
        let result = device.write().set_present(core, false);
        if let Err(err) = result {
            error!("failed to mark device as missing: {}", err);
        }
    }

    pub fn is_device_known(&self, uuid: &str) -> bool {
        Device::from_uuid(self.core(), uuid)
            .unwrap_or(None)
            .is_some()
    }

    // ---- P2P / infohash extensions ---------------------------------------

    pub fn find_media_by_infohash(
        &self,
        infohash: &str,
        file_index: Option<i64>,
        sort: SortingCriteria,
        desc: bool,
    ) -> Vec<MediaPtr> {
        Media::find_by_infohash(self.core(), infohash, file_index, sort, desc)
            .unwrap_or_default()
    }

    pub fn find_media_by_parent(
        &self,
        parent_id: i64,
        sort: SortingCriteria,
        desc: bool,
    ) -> Vec<MediaPtr> {
        Media::find_by_parent(self.core(), parent_id, sort, desc).unwrap_or_default()
    }

    pub fn find_duplicates_by_infohash(&self) -> Vec<MediaPtr> {
        Media::find_duplicates_by_infohash(self.core()).unwrap_or_default()
    }

    pub fn copy_metadata(&self, source_id: i64, dest_id: i64) -> bool {
        Media::copy_metadata(self.core(), source_id, dest_id).unwrap_or(false)
    }

    pub fn remove_orphan_transport_files(&self) -> bool {
        // Intentionally not implemented; kept for interface parity.
        false
    }
}

impl Drop for MediaLibrary {
    fn drop(&mut self) {
        // Stop the discoverer first so it cannot write while we tear down.
        if let Some(discoverer) = self.discoverer.take() {
            discoverer.stop();
        }
        if let Some(core) = &self.core {
            // Take the handles out before stopping: workers being joined
            // may still read these slots.
            let parser = core.parser.write().take();
            if let Some(parser) = parser {
                parser.stop();
            }
            let notifier = core.notifier.write().take();
            if let Some(notifier) = notifier {
                notifier.stop();
            }
        }
        self.clear_cache();
    }
}

fn evict(core: &Arc<Core>, table: &str, rowid: i64) {
    match table {
        "Media" => core.cache.media.remove(rowid),
        "File" => core.cache.files.remove(rowid),
        "Folder" => core.cache.folders.remove(rowid),
        "Device" => core.cache.devices.remove(rowid),
        "Album" => core.cache.albums.remove(rowid),
        "AlbumTrack" => core.cache.album_tracks.remove(rowid),
        "Artist" => core.cache.artists.remove(rowid),
        "Genre" => core.cache.genres.remove(rowid),
        "Label" => core.cache.labels.remove(rowid),
        "Playlist" => core.cache.playlists.remove(rowid),
        "Show" => core.cache.shows.remove(rowid),
        "ShowEpisode" => core.cache.show_episodes.remove(rowid),
        "Movie" => core.cache.movies.remove(rowid),
        "AudioTrack" => core.cache.audio_tracks.remove(rowid),
        "History" => core.cache.history.remove(rowid),
        _ => {}
    }
}

/// Reconcile the catalog's device presence flags with what a factory
/// currently sees mounted.
fn refresh_devices(core: &Arc<Core>, factory: &dyn FsFactory) -> Result<()> {
    factory.refresh_devices();
    for device in Device::fetch_all(core)? {
        let uuid = device.read().uuid().to_string();
        let device_fs = factory.create_device(&uuid);
        let fs_present = device_fs.map(|d| d.is_present()).unwrap_or(false);
        let stored_present = device.read().is_present();
        if stored_present != fs_present {
            info!(
                uuid,
                from = stored_present,
                to = fs_present,
                "device changed presence state"
            );
            device.write().set_present(core, fs_present)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NoopCallback;
    use crate::test_utils::TestLibrary;

    #[test]
    fn initialize_twice_reports_already_initialized() {
        let mut t = TestLibrary::new();
        let thumbnails = tempfile::tempdir().unwrap();
        let result = t.ml.initialize_in_memory(
            thumbnails.path().to_str().unwrap(),
            Some(Arc::new(NoopCallback)),
        );
        assert_eq!(result, InitResult::AlreadyInitialized);
    }

    #[test]
    fn start_follows_initialize() {
        let mut t = TestLibrary::new();
        assert!(t.ml.start());
        assert!(!t.ml.start());
    }

    #[test]
    fn on_disk_catalog_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("media.db");
        let thumb_path = dir.path().join("thumbs");
        let db = db_path.to_str().unwrap();
        let thumbs = thumb_path.to_str().unwrap();

        let album_id = {
            let mut ml = MediaLibrary::new();
            let result = ml.initialize(db, thumbs, Some(Arc::new(NoopCallback)));
            assert_eq!(result, InitResult::Success);
            let album = ml.create_album("persisted").unwrap();
            let mut guard = album.write();
            guard.set_release_year(ml.core(), 1982, true).unwrap();
            guard.id()
        };

        let mut ml = MediaLibrary::new();
        let result = ml.initialize(db, thumbs, Some(Arc::new(NoopCallback)));
        assert_eq!(result, InitResult::Success);
        let album = ml.album(album_id).unwrap();
        assert_eq!(album.read().title(), Some("persisted"));
        assert_eq!(album.read().release_year(), 1982);
    }

    #[test]
    fn downgraded_database_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("media.db");
        let thumb_path = dir.path().join("thumbs");
        let db = db_path.to_str().unwrap();
        let thumbs = thumb_path.to_str().unwrap();

        {
            let mut ml = MediaLibrary::new();
            assert_eq!(
                ml.initialize(db, thumbs, Some(Arc::new(NoopCallback))),
                InitResult::Success
            );
            ml.create_album("doomed").unwrap();
            let core = ml.core();
            core.db
                .writer()
                .execute("UPDATE Settings SET db_model_version = 99", [])
                .unwrap();
        }

        let mut ml = MediaLibrary::new();
        assert_eq!(
            ml.initialize(db, thumbs, Some(Arc::new(NoopCallback))),
            InitResult::DbReset
        );
        assert!(ml.albums(SortingCriteria::Default, false).is_empty());
    }

    #[test]
    fn short_patterns_return_empty_aggregates() {
        let t = TestLibrary::new();
        t.add_audio_media("ab.mp3");
        let result = t.ml.search("ab");
        assert!(result.media.tracks.is_empty());
        assert!(result.media.others.is_empty());
        assert!(result.albums.is_empty());
        assert!(result.artists.is_empty());
        assert!(result.genres.is_empty());
        assert!(result.playlists.is_empty());
    }

    #[test]
    fn search_aggregates_are_split_by_subtype() {
        let t = TestLibrary::new();
        t.add_audio_media("everything here.mp3");
        let album = t.ml.create_album("everything albums").unwrap();
        let artist = t.ml.create_artist("everything artists").unwrap();
        t.ml.create_playlist("everything playlists").unwrap();
        t.ml.create_genre("everything genres").unwrap();
        // Keep the album and artist present by attaching a track.
        let media = t.add_audio_media("filler.mp3");
        crate::model::album_track::AlbumTrack::create(
            t.core(),
            &media,
            &album,
            Some(&artist),
            None,
            1,
            1,
        )
        .unwrap();

        let result = t.ml.search("everything");
        assert_eq!(result.media.others.len(), 1);
        assert_eq!(result.albums.len(), 1);
        assert_eq!(result.artists.len(), 1);
        assert_eq!(result.playlists.len(), 1);
        assert_eq!(result.genres.len(), 1);
    }

    #[test]
    fn external_media_are_found_by_mrl() {
        let t = TestLibrary::new();
        let media = t.ml.add_media("http://example.com/stream.mp3").unwrap();
        assert!(media.read().is_external());
        let found = t.ml.media_from_mrl("http://example.com/stream.mp3").unwrap();
        assert_eq!(found.read().id(), media.read().id());

        // The same MRL cannot be added twice.
        assert!(t.ml.add_media("http://example.com/stream.mp3").is_none());
    }

    #[test]
    fn catalogued_files_are_found_by_mrl() {
        let t = TestLibrary::new();
        let (media, _file) = t.add_media_at("file:///music/findme.mp3", MediaType::Audio);
        let found = t.ml.media_from_mrl("file:///music/findme.mp3").unwrap();
        assert_eq!(found.read().id(), media.read().id());
        assert!(t.ml.media_from_mrl("file:///music/absent.mp3").is_none());
    }

    #[test]
    fn p2p_media_are_created_atomically() {
        let t = TestLibrary::new();
        let media = t
            .ml
            .add_p2p_media(None, MediaType::Video, "episode", "magnet:?xt=urn:btih:feed")
            .unwrap();
        assert!(media.read().is_p2p());
        let files = media.read().files(t.core()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].read().is_external());

        // A second media on the same transport MRL must not leave a
        // half-created row behind.
        let before: i64 = t
            .core()
            .db
            .reader()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM Media", [], |r| r.get(0))
            .unwrap();
        assert!(t
            .ml
            .add_p2p_media(None, MediaType::Video, "dup", "magnet:?xt=urn:btih:feed")
            .is_none());
        let after: i64 = t
            .core()
            .db
            .reader()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM Media", [], |r| r.get(0))
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn stream_history_is_recorded_and_cleared() {
        let t = TestLibrary::new();
        let media = t.add_audio_media("streamed.mp3");
        assert!(t.ml.add_to_stream_history(&media));
        let history = t.ml.last_streams_played();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].read().media_id(), Some(media.read().id()));

        assert!(t.ml.clear_history());
        assert!(t.ml.last_streams_played().is_empty());
        assert!(t.ml.last_media_played().is_empty());
    }

    #[test]
    fn device_callbacks_track_known_devices() {
        let t = TestLibrary::new();
        t.fs.add_device("usb", "file:///mnt/usb/", true);
        assert!(!t.ml.is_device_known("usb"));
        t.add_media_at("file:///mnt/usb/track.mp3", MediaType::Audio);
        assert!(t.ml.is_device_known("usb"));

        // Already known: plugged reports false.
        assert!(!t.ml.on_device_plugged("usb", "file:///mnt/usb/"));
        t.ml.on_device_unplugged("usb");
        let device = t.device("usb").unwrap();
        assert!(!device.read().is_present());

        // Unknown devices report true on first plug.
        assert!(t.ml.on_device_plugged("other", "file:///mnt/other/"));
    }

    #[test]
    fn start_reconciles_device_presence() {
        let mut t = TestLibrary::new();
        t.fs.add_device("usb", "file:///mnt/usb/", true);
        t.add_media_at("file:///mnt/usb/track.mp3", MediaType::Audio);
        // The stick disappears while the library is down.
        t.fs.set_device_present("usb", false);

        assert!(t.ml.start());
        let device = t.device("usb").unwrap();
        assert!(!device.read().is_present());
    }

    #[test]
    fn orphan_transport_file_removal_is_a_noop() {
        let t = TestLibrary::new();
        assert!(!t.ml.remove_orphan_transport_files());
    }

    #[test]
    fn force_rescan_wipes_derived_metadata_but_keeps_files() {
        let t = TestLibrary::new();
        let (media, _file) = t.add_media_at("file:///music/kept.mp3", MediaType::Audio);
        let album = t.ml.create_album("derived").unwrap();
        let artist = t.ml.create_artist("derived artist").unwrap();
        crate::model::album_track::AlbumTrack::create(
            t.core(),
            &media,
            &album,
            Some(&artist),
            None,
            1,
            1,
        )
        .unwrap();
        let media_id = media.read().id();
        drop((media, album, artist));

        t.ml.force_rescan();

        assert!(t.ml.albums(SortingCriteria::Default, false).is_empty());
        assert!(t.ml.artists(true, SortingCriteria::Default, false).is_empty());
        // The media and file rows survive, ready to be re-parsed.
        let media = t.ml.media(media_id).unwrap();
        assert_eq!(media.read().files(t.core()).unwrap().len(), 1);
    }
}

//! Storage engine: connection handling, transactions, retries and update
//! hooks over a single SQLite database file.
//!
//! One writable connection (behind a reentrant lock, so nested transactions
//! coalesce to the outermost) plus an r2d2 pool for concurrent reads. The
//! database runs in WAL mode with foreign keys and recursive triggers
//! enabled; presence propagation and cascading deletion rely on both.

pub mod cache;
pub mod entity;
pub mod migrations;
pub mod schema;

#[cfg(test)]
mod invariant_props;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use tracing::warn;

use crate::error::{Error, Result};

/// Why an update hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookReason {
    Insert,
    Update,
    Delete,
}

type UpdateHookFn = Box<dyn Fn(HookReason, i64) + Send + Sync>;

#[derive(Default)]
struct HookRegistry {
    hooks: RwLock<HashMap<String, Vec<UpdateHookFn>>>,
}

impl HookRegistry {
    fn dispatch(&self, table: &str, reason: HookReason, rowid: i64) {
        let hooks = self.hooks.read();
        if let Some(callbacks) = hooks.get(table) {
            for cb in callbacks {
                cb(reason, rowid);
            }
        }
    }
}

/// Read connection type alias
pub type ReadConnection = PooledConnection<SqliteConnectionManager>;

// read_uncommitted only has an effect on shared-cache (in-memory)
// databases, where it keeps readers from tripping on table locks held by
// the writer; WAL readers never block on the writer to begin with.
const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA recursive_triggers = ON;
    PRAGMA read_uncommitted = ON;
";

/// Unique names for shared-cache in-memory databases, so every store gets
/// its own database while the writer and the pool still see the same one.
static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Main database interface: single writer, pooled readers.
pub struct SqlStore {
    writer: ReentrantMutex<Connection>,
    pool: Pool<SqliteConnectionManager>,
    hooks: Arc<HookRegistry>,
    hook_installed: AtomicUsize,
    tx_depth: AtomicUsize,
    path: Option<PathBuf>,
}

impl SqlStore {
    /// Open (or create) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let uri = path.to_string_lossy().into_owned();
        Self::open_uri(&uri, Some(path))
    }

    /// Open a private in-memory database (shared between the writer and the
    /// read pool through SQLite's shared cache).
    pub fn open_in_memory() -> Result<Self> {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let uri = format!("file:medialib_mem_{}?mode=memory&cache=shared", seq);
        Self::open_uri(&uri, None)
    }

    fn open_uri(uri: &str, path: Option<PathBuf>) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let writer = Connection::open_with_flags(uri, flags)?;
        writer.execute_batch(PRAGMAS)?;
        writer.busy_timeout(Duration::from_millis(250))?;

        let manager = SqliteConnectionManager::file(uri)
            .with_flags(flags)
            .with_init(|conn| {
                conn.execute_batch(PRAGMAS)?;
                conn.busy_timeout(Duration::from_millis(250))
            });
        let pool = Pool::builder()
            .max_size(4)
            .min_idle(Some(1))
            .build(manager)?;

        Ok(Self {
            writer: ReentrantMutex::new(writer),
            pool,
            hooks: Arc::new(HookRegistry::default()),
            hook_installed: AtomicUsize::new(0),
            tx_depth: AtomicUsize::new(0),
            path,
        })
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Acquire the write connection. Reentrant: a thread already holding it
    /// may lock again (used by nested transactions).
    pub fn writer(&self) -> ReentrantMutexGuard<'_, Connection> {
        self.writer.lock()
    }

    /// Borrow a pooled read connection.
    pub fn reader(&self) -> Result<ReadConnection> {
        Ok(self.pool.get()?)
    }

    /// Run a read-only closure on an appropriate connection: the pool when
    /// idle, the write connection when the calling thread has a transaction
    /// open so its uncommitted state stays visible.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.tx_depth.load(Ordering::Relaxed) > 0 {
            let conn = self.writer();
            f(&conn)
        } else {
            let conn = self.reader()?;
            f(&conn)
        }
    }

    /// Run `f` inside a transaction on the write connection.
    ///
    /// The outermost call opens `BEGIN IMMEDIATE` and commits on `Ok` /
    /// rolls back on `Err`; nested calls coalesce into the outer
    /// transaction, so an inner failure aborts the whole unit of work.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.writer();
        // Only the thread holding the reentrant lock touches the depth.
        let depth = self.tx_depth.load(Ordering::Relaxed);
        if depth == 0 {
            conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        self.tx_depth.store(depth + 1, Ordering::Relaxed);
        let result = f(&conn);
        self.tx_depth.store(depth, Ordering::Relaxed);
        if depth == 0 {
            match &result {
                Ok(_) => {
                    if let Err(err) = conn.execute_batch("COMMIT") {
                        let _ = conn.execute_batch("ROLLBACK");
                        return Err(err.into());
                    }
                }
                Err(_) => {
                    if let Err(err) = conn.execute_batch("ROLLBACK") {
                        warn!("failed to roll back transaction: {}", err);
                    }
                }
            }
        }
        result
    }

    /// Retry `f` up to `retries` times while it fails with `Busy`, with
    /// exponential backoff between attempts.
    pub fn with_retries<T, F>(&self, retries: u32, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match f() {
                Err(err) if err.is_busy() && attempt < retries => {
                    let backoff = Duration::from_millis(50 << attempt);
                    warn!("database busy, retrying in {:?}: {}", backoff, err);
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Register a callback fired for every row change on `table`.
    ///
    /// Callbacks run synchronously on the thread executing the statement,
    /// before its transaction returns, and must not block or touch the
    /// database. The underlying SQLite hook is only installed once a
    /// callback is registered.
    pub fn register_update_hook<F>(&self, table: &str, callback: F)
    where
        F: Fn(HookReason, i64) + Send + Sync + 'static,
    {
        self.hooks
            .hooks
            .write()
            .entry(table.to_string())
            .or_default()
            .push(Box::new(callback));

        if self.hook_installed.swap(1, Ordering::SeqCst) == 0 {
            let registry = Arc::clone(&self.hooks);
            let conn = self.writer();
            conn.update_hook(Some(
                move |action: rusqlite::hooks::Action, _db: &str, table: &str, rowid: i64| {
                    let reason = match action {
                        rusqlite::hooks::Action::SQLITE_INSERT => HookReason::Insert,
                        rusqlite::hooks::Action::SQLITE_UPDATE => HookReason::Update,
                        rusqlite::hooks::Action::SQLITE_DELETE => HookReason::Delete,
                        _ => return,
                    };
                    registry.dispatch(table, reason, rowid);
                },
            ));
        }
    }

    /// Run `f` with foreign-key enforcement and recursive trigger firing
    /// disabled. Must not be called inside a transaction: SQLite ignores
    /// the foreign-key pragma while one is open. Used by schema migrations
    /// that rebuild tables in place.
    pub fn weak_context<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.writer();
        debug_assert_eq!(self.tx_depth.load(Ordering::Relaxed), 0);
        conn.execute_batch("PRAGMA foreign_keys = OFF; PRAGMA recursive_triggers = OFF;")?;
        let result = f(&conn);
        if let Err(err) =
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA recursive_triggers = ON;")
        {
            warn!("failed to restore connection pragmas: {}", err);
        }
        result
    }
}

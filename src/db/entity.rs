//! Generic, cache-aware CRUD over the persisted entity types.
//!
//! Every entity advertises its table, primary key and row decoder through
//! [`DatabaseEntity`]; the shared operations are free functions
//! parameterized by that capability. Reads go through the pool unless the
//! calling thread has a write transaction open, in which case they use the
//! write connection so uncommitted state stays visible.

use rusqlite::{Params, Row};

use crate::core::Core;
use crate::db::cache::{CacheShard, EntityCache, EntityPtr};
use crate::error::Result;

/// Capability set shared by all persisted entities.
pub trait DatabaseEntity: Sized + Send + Sync + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str;

    fn from_row(row: &Row) -> rusqlite::Result<Self>;
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn shard(cache: &EntityCache) -> &CacheShard<Self>;
}

/// Fetch by primary key, returning the live cached record when present.
pub fn fetch<T: DatabaseEntity>(core: &Core, id: i64) -> Result<Option<EntityPtr<T>>> {
    T::shard(&core.cache).get_or_load(id, || {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            T::TABLE,
            T::PRIMARY_KEY
        );
        core.db.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(T::from_row(row)?)),
                None => Ok(None),
            }
        })
    })
}

/// Fetch the first row of an arbitrary query.
pub fn fetch_one<T: DatabaseEntity, P: Params>(
    core: &Core,
    sql: &str,
    params: P,
) -> Result<Option<EntityPtr<T>>> {
    let record = core.db.read(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(T::from_row(row)?)),
            None => Ok(None),
        }
    })?;
    Ok(record.map(|r| adopt(core, r)))
}

/// Fetch every row of an arbitrary query, in the query's order.
pub fn fetch_all<T: DatabaseEntity, P: Params>(
    core: &Core,
    sql: &str,
    params: P,
) -> Result<Vec<EntityPtr<T>>> {
    let records: Vec<T> = core.db.read(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| T::from_row(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })?;
    Ok(records.into_iter().map(|r| adopt(core, r)).collect())
}

/// Insert a freshly built record and return its cached pointer.
///
/// Constraint violations bubble up so insert-or-fetch call sites can
/// recover by fetching the existing row.
pub fn insert<T: DatabaseEntity, P: Params>(
    core: &Core,
    mut record: T,
    sql: &str,
    params: P,
) -> Result<EntityPtr<T>> {
    let conn = core.db.writer();
    conn.execute(sql, params)?;
    record.set_id(conn.last_insert_rowid());
    drop(conn);
    Ok(T::shard(&core.cache).adopt(record.id(), record))
}

/// Delete by primary key. Cascades run through foreign keys and triggers;
/// the cache entry is dropped here as well as from the delete hook.
pub fn destroy<T: DatabaseEntity>(core: &Core, id: i64) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        T::TABLE,
        T::PRIMARY_KEY
    );
    let deleted = {
        let conn = core.db.writer();
        conn.execute(&sql, [id])?
    };
    T::shard(&core.cache).remove(id);
    Ok(deleted > 0)
}

fn adopt<T: DatabaseEntity>(core: &Core, record: T) -> EntityPtr<T> {
    T::shard(&core.cache).adopt(record.id(), record)
}

//! The settings singleton row, carrying the on-disk schema version.

use rusqlite::{params, Connection};

use crate::db::SqlStore;
use crate::error::Result;

/// Current schema version. Databases above it (downgrades) or below the
/// supported floor are dropped and recreated.
pub const DB_MODEL_VERSION: u32 = 13;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    db_model_version: u32,
}

impl Settings {
    pub fn create_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Settings (
                db_model_version UNSIGNED INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Load the singleton row; a missing row means a fresh database, which
    /// is marked at the current model version.
    pub fn load(db: &SqlStore) -> Result<Settings> {
        let conn = db.writer();
        let stored: Option<u32> = conn
            .query_row("SELECT db_model_version FROM Settings", [], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                err => Err(err),
            })?;
        match stored {
            Some(version) => Ok(Settings {
                db_model_version: version,
            }),
            None => {
                conn.execute(
                    "INSERT INTO Settings(db_model_version) VALUES(?)",
                    params![DB_MODEL_VERSION],
                )?;
                Ok(Settings {
                    db_model_version: DB_MODEL_VERSION,
                })
            }
        }
    }

    pub fn db_model_version(&self) -> u32 {
        self.db_model_version
    }

    pub fn set_db_model_version(&mut self, db: &SqlStore, version: u32) -> Result<()> {
        db.writer().execute(
            "UPDATE Settings SET db_model_version = ?",
            params![version],
        )?;
        self.db_model_version = version;
        Ok(())
    }
}

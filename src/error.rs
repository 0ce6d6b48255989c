//! Library error types.
//!
//! SQLite failures are classified into the kinds the retry and recovery
//! policies care about: constraint violations are recovered locally by the
//! insert-or-fetch paths, busy errors are retried, corruption is fatal for
//! the surrounding operation.

use thiserror::Error;

/// Library error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("constraint violation: {0}")]
    Constraint(rusqlite::Error),

    #[error("database busy: {0}")]
    Busy(rusqlite::Error),

    #[error("database corrupted: {0}")]
    Corrupt(rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode::*;
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ConstraintViolation => Error::Constraint(err),
                DatabaseBusy | DatabaseLocked => Error::Busy(err),
                DatabaseCorrupt | NotADatabase => Error::Corrupt(err),
                _ => Error::Sqlite(err),
            },
            _ => Error::Sqlite(err),
        }
    }
}

impl Error {
    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::Constraint(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

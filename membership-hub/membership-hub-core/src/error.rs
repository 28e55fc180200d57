//! Error type shared by every store in the crate.

use rusqlite::ffi;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("unknown account state {0}")]
    InvalidState(i64),
    #[error("unknown membership type {0}")]
    InvalidMembershipType(i64),
}

impl Error {
    /// True when the backing store rejected a write because a `UNIQUE` or
    /// `PRIMARY KEY` constraint already holds the value.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Sqlite(err) => is_unique_violation(err),
            _ => false,
        }
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                && (failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

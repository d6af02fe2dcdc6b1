//! Claim store error types.

/// Errors produced by [`ClaimStore`](crate::ClaimStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Another connection holds the database write lock.
    #[error("claim store busy: {0}")]
    Busy(rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("claim store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<rusqlite::Error> for StateError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Busy(err)
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

//! `SQLite`-backed implementation of [`ClaimStore`].
//!
//! Agents on one host share a database file; each claim runs in a
//! `BEGIN IMMEDIATE` transaction so the insert-if-absent and the owner
//! read happen under the write lock.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use conduit_types::StageKey;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::claim::{AgentId, ClaimStore};
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// How long a connection waits on another writer before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Idempotent DDL for the claim table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS stage_claims (
    stream_group TEXT NOT NULL,
    stage_index INTEGER NOT NULL,
    owner TEXT NOT NULL,
    claimed_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (stream_group, stage_index)
);
";

/// `SQLite`-backed claim storage.
///
/// Create with [`SqliteClaimStore::open`] for a shared file or
/// [`SqliteClaimStore::in_memory`] for tests.
pub struct SqliteClaimStore {
    conn: Mutex<Connection>,
}

impl SqliteClaimStore {
    /// Open or create a claim database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(conn)
    }

    /// Create an in-memory claim store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }
}

impl ClaimStore for SqliteClaimStore {
    fn claim(&self, key: &StageKey, owner: &AgentId) -> error::Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR IGNORE INTO stage_claims (stream_group, stage_index, owner, claimed_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![key.group, key.index, owner.as_str(), Self::now_sqlite()],
        )?;
        let holder: String = tx.query_row(
            "SELECT owner FROM stage_claims WHERE stream_group = ?1 AND stage_index = ?2",
            rusqlite::params![key.group, key.index],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let won = holder == owner.as_str();
        if !won {
            tracing::debug!(
                group = %key.group,
                index = key.index,
                owner = %holder,
                "Stage already claimed"
            );
        }
        Ok(won)
    }

    fn release(&self, key: &StageKey) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM stage_claims WHERE stream_group = ?1 AND stage_index = ?2",
            rusqlite::params![key.group, key.index],
        )?;
        Ok(())
    }

    fn owner(&self, key: &StageKey) -> error::Result<Option<AgentId>> {
        let conn = self.lock_conn()?;
        let owner: Option<String> = conn
            .query_row(
                "SELECT owner FROM stage_claims WHERE stream_group = ?1 AND stage_index = ?2",
                rusqlite::params![key.group, key.index],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.map(AgentId::new))
    }
}

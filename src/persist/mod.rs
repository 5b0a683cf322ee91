//! `SQLite` access for the legacy and v2 record stores.

/// Legacy singleton state row.
pub mod legacy;
/// Schema installation and revision column probing.
pub mod schema;
/// Normalized per-record v2 table.
pub mod v2;

use std::{path::PathBuf, time::Duration};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

/// Storage-level failures. Display text is for server-side logs only.
#[derive(Debug, Error)]
pub enum PersistError {
    /// `SQLite` engine error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Stored JSON could not be encoded or decoded.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// No database path configured.
    #[error("database not configured")]
    NotConfigured,
    /// Other storage failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Connection factory for the records database.
///
/// Each repository operation opens its own connection so concurrent writers
/// contend on the database write lock, not on an in-process mutex.
#[derive(Debug, Clone)]
pub struct Database {
    path: Option<PathBuf>,
    busy_timeout: Duration,
}

impl Database {
    /// Creates a factory; `path = None` models an unconfigured database.
    pub fn new(path: Option<PathBuf>, busy_timeout_ms: u64) -> Self {
        Self {
            path,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        }
    }

    /// Opens a connection with the busy timeout applied.
    pub fn open(&self) -> PersistResult<Connection> {
        let path = self.path.as_ref().ok_or(PersistError::NotConfigured)?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Verifies the database is reachable and switches it to WAL.
    ///
    /// WAL keeps readers off the writer's lock.
    pub fn ensure_ready(&self) -> PersistResult<()> {
        let conn = self.open()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Runs `f` inside a write transaction that holds the database write lock
/// from its first statement (`BEGIN IMMEDIATE`).
///
/// Commits when `f` returns `Ok`; any `Err` rolls the whole transaction back.
pub fn with_write_transaction<T, E, F>(conn: &mut Connection, f: F) -> Result<T, E>
where
    E: From<PersistError>,
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(PersistError::from)?;
    let out = f(&tx)?;
    tx.commit().map_err(PersistError::from)?;
    Ok(out)
}

/// Runs `f` inside a deferred read transaction for a consistent snapshot.
pub fn with_read_transaction<T, E, F>(conn: &mut Connection, f: F) -> Result<T, E>
where
    E: From<PersistError>,
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Deferred)
        .map_err(PersistError::from)?;
    let out = f(&tx)?;
    tx.commit().map_err(PersistError::from)?;
    Ok(out)
}

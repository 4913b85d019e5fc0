//! Database access layer for the volume cache.
//!
//! A thin wrapper over a single SQLite connection. It executes parameterized
//! statements and maps rows; it knows nothing about volumes or assets beyond
//! the schema it bootstraps (see `schema.rs`).
//!
//! The connection sits behind a `std::sync::Mutex`, so every call blocks the
//! current thread. Async callers go through `tokio::task::spawn_blocking`.

pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction};
use thiserror::Error;
use tracing::info;

/// Generic storage failure. Engine-specific error codes are flattened into
/// the message; callers never branch on them.
#[derive(Debug, Clone, Error)]
#[error("storage error: {message}")]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Shared handle to the SQLite cache. Cloning is cheap.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::new(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        // journal_mode answers with the resulting mode, so it needs the
        // checking variant.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        let db = Self::bootstrap(conn)?;
        info!(path = %path.display(), "Volume cache opened");
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        {
            let mut conn = db.lock();
            schema::migrate(&mut conn)?;
        }
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite itself
        // inconsistent, so a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute a statement and return the number of affected rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, StorageError> {
        Ok(self.lock().execute(sql, params)?)
    }

    /// Run a query and map every row.
    pub fn fetch_all<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StorageError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Run a query and map the first row, if any.
    pub fn fetch_one<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Option<T>, StorageError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.lock().query_row(sql, params, map).optional()?)
    }

    /// Run `f` inside a transaction. Commits when `f` returns `Ok`, rolls
    /// back (on drop) otherwise.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StorageError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }
}

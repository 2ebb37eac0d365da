//! Database connection management.
//!
//! A single rusqlite Connection behind a Mutex. WAL mode and the usual
//! PRAGMAs are applied on open, followed by pending migrations.

use std::path::Path;
use std::sync::Mutex;

use parley_core::config::StorageConfig;
use rusqlite::Connection;
use tracing::info;

use crate::error::PersistenceError;
use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the backend named by `config.cache_backend`.
    ///
    /// `":memory:"` yields a private in-memory database; anything else is a
    /// file path with `~` expanded.
    pub fn open(config: &StorageConfig) -> Result<Self, PersistenceError> {
        if config.is_in_memory() {
            Self::in_memory()
        } else {
            Self::new(&config.database_path())
        }
    }

    /// Open (or create) a database at the given path.
    pub fn new(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::StoreUnavailable(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            PersistenceError::StoreUnavailable(format!("Failed to open database: {}", e))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 2000;",
        )
        .map_err(|e| PersistenceError::StoreUnavailable(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            PersistenceError::StoreUnavailable(format!("Failed to open in-memory db: {}", e))
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Connection) -> Result<T, PersistenceError>,
    {
        let conn = self.conn.lock().map_err(|e| {
            PersistenceError::StoreUnavailable(format!("Database lock poisoned: {}", e))
        })?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

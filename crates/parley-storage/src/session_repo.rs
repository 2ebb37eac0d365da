//! Raw session snapshot persistence.

use std::sync::Arc;

use parley_core::Timestamp;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::PersistenceError;

/// A serialized session as it sits in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub session_id: String,
    /// JSON-encoded session record.
    pub snapshot: String,
    pub schema_version: u32,
    pub last_active: Timestamp,
}

/// Key-value storage of session snapshots.
///
/// Implementations must make `save` an atomic overwrite of the prior value.
pub trait SessionBackend: Send + Sync {
    fn load(&self, session_id: &str) -> Result<Option<StoredSnapshot>, PersistenceError>;
    fn save(&self, snapshot: &StoredSnapshot) -> Result<(), PersistenceError>;
    fn delete(&self, session_id: &str) -> Result<bool, PersistenceError>;
    /// Remove every session whose last activity is strictly before `cutoff`.
    fn delete_idle(&self, cutoff: Timestamp) -> Result<usize, PersistenceError>;
    fn count(&self) -> Result<usize, PersistenceError>;
}

/// SQLite-backed session repository.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SessionBackend for SessionRepository {
    fn load(&self, session_id: &str) -> Result<Option<StoredSnapshot>, PersistenceError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, snapshot, schema_version, last_active
                     FROM sessions WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| {
                        Ok(StoredSnapshot {
                            session_id: row.get(0)?,
                            snapshot: row.get(1)?,
                            schema_version: row.get::<_, i64>(2)? as u32,
                            last_active: Timestamp(row.get(3)?),
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    fn save(&self, snapshot: &StoredSnapshot) -> Result<(), PersistenceError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, snapshot, schema_version, last_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%s', 'now'))
                 ON CONFLICT(session_id) DO UPDATE SET
                    snapshot = excluded.snapshot,
                    schema_version = excluded.schema_version,
                    last_active = excluded.last_active,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    snapshot.session_id,
                    snapshot.snapshot,
                    snapshot.schema_version as i64,
                    snapshot.last_active.0,
                ],
            )
            .map_err(|e| {
                PersistenceError::StoreUnavailable(format!("Failed to save session: {}", e))
            })?;
            Ok(())
        })
    }

    fn delete(&self, session_id: &str) -> Result<bool, PersistenceError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                rusqlite::params![session_id],
            )?;
            Ok(n > 0)
        })
    }

    fn delete_idle(&self, cutoff: Timestamp) -> Result<usize, PersistenceError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sessions WHERE last_active < ?1",
                rusqlite::params![cutoff.0],
            )?;
            Ok(n)
        })
    }

    fn count(&self) -> Result<usize, PersistenceError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}

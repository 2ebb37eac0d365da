//! Database schema migrations.
//!
//! Version 1 creates the session snapshot and embedding cache tables.

use rusqlite::Connection;
use tracing::info;

use crate::error::PersistenceError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| {
        PersistenceError::StoreUnavailable(format!("Failed to create migrations table: {}", e))
    })?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            PersistenceError::StoreUnavailable(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: sessions and embedding_cache.
fn apply_v1(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        -- One JSON snapshot per conversation session.
        CREATE TABLE IF NOT EXISTS sessions (
            session_id      TEXT PRIMARY KEY NOT NULL,
            snapshot        TEXT NOT NULL,
            schema_version  INTEGER NOT NULL,
            last_active     INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_last_active
            ON sessions (last_active);

        -- Command embeddings keyed by content fingerprint and model.
        CREATE TABLE IF NOT EXISTS embedding_cache (
            fingerprint     TEXT NOT NULL,
            model           TEXT NOT NULL,
            dimensions      INTEGER NOT NULL,
            vector          BLOB NOT NULL,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (fingerprint, model)
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| PersistenceError::StoreUnavailable(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["sessions", "embedding_cache"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_embedding_cache_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO embedding_cache (fingerprint, model, dimensions, vector)
             VALUES ('fp', 'm1', 1, x'00000000')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO embedding_cache (fingerprint, model, dimensions, vector)
             VALUES ('fp', 'm2', 1, x'00000000')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO embedding_cache (fingerprint, model, dimensions, vector)
             VALUES ('fp', 'm1', 1, x'00000000')",
            [],
        );
        assert!(dup.is_err());
    }
}

//! Persistent cache of command embeddings.
//!
//! Rows are keyed by (fingerprint, model) so that changing either the command
//! text or the embedding model misses the cache.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tracing::warn;

use crate::db::Database;
use crate::error::PersistenceError;

pub struct EmbeddingCacheRepository {
    db: Arc<Database>,
}

impl EmbeddingCacheRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, fingerprint: &str, model: &str) -> Result<Option<Vec<f32>>, PersistenceError> {
        let row: Option<(i64, Vec<u8>)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT dimensions, vector FROM embedding_cache
                     WHERE fingerprint = ?1 AND model = ?2",
                    rusqlite::params![fingerprint, model],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        match row {
            Some((dimensions, blob)) => match decode_vector(&blob) {
                Some(vector) if vector.len() == dimensions as usize => Ok(Some(vector)),
                _ => {
                    warn!(fingerprint, model, "Discarding malformed cached embedding");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub fn put(&self, fingerprint: &str, model: &str, vector: &[f32]) -> Result<(), PersistenceError> {
        let blob = encode_vector(vector);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO embedding_cache (fingerprint, model, dimensions, vector)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![fingerprint, model, vector.len() as i64, blob],
            )?;
            Ok(())
        })
    }

    /// Remove entries produced by any model other than `model`.
    pub fn purge_other_models(&self, model: &str) -> Result<usize, PersistenceError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM embedding_cache WHERE model != ?1",
                rusqlite::params![model],
            )?)
        })
    }

    pub fn count(&self) -> Result<usize, PersistenceError> {
        self.db.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}

/// Little-endian f32 packing.
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

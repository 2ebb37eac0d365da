//! Parley Storage crate - SQLite persistence for conversation sessions and
//! the embedding cache.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! session snapshots and cached command embeddings, and the `SessionStore`
//! that layers TTL expiry, bounded retries, and degraded in-memory fallback
//! on top of them.

pub mod db;
pub mod embedding_cache;
pub mod error;
pub mod migrations;
pub mod session_repo;
pub mod session_store;

pub use db::Database;
pub use embedding_cache::EmbeddingCacheRepository;
pub use error::PersistenceError;
pub use session_repo::{SessionBackend, SessionRepository, StoredSnapshot};
pub use session_store::{Durability, RetryPolicy, SessionRecord, SessionStore, StoreOptions};

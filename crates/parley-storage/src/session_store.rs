//! Conversation state store.
//!
//! Wraps a [`SessionBackend`] with TTL expiry, bounded retries, and a
//! non-durable in-memory fallback for sessions whose persistence failed.
//! Sessions that fall back stay in memory for the rest of their lifetime and
//! are reported through [`SessionStore::is_degraded`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_core::config::ParleyConfig;
use parley_core::{ConversationSession, Timestamp, SESSION_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::session_repo::{SessionBackend, StoredSnapshot};

/// Versioned on-disk form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub schema_version: u32,
    #[serde(flatten)]
    pub session: ConversationSession,
}

/// Whether a write reached durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Durable,
    /// Held in memory only; lost on restart.
    Degraded,
}

/// Bounded retry with doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub ttl_secs: u64,
    pub retry: RetryPolicy,
}

impl StoreOptions {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            ttl_secs: config.session.ttl_secs,
            retry: RetryPolicy {
                attempts: config.storage.retry_attempts.max(1),
                initial_backoff: Duration::from_millis(config.storage.retry_backoff_ms),
            },
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&ParleyConfig::default())
    }
}

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    options: StoreOptions,
    /// Sessions running in degraded, memory-only mode.
    fallback: Mutex<HashMap<String, ConversationSession>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            fallback: Mutex::new(HashMap::new()),
        }
    }

    /// Load a session, or a fresh one if it is absent, expired, or unreadable.
    pub async fn get(&self, session_id: &str) -> ConversationSession {
        let now = Timestamp::now();

        if let Some(session) = self.fallback_get(session_id) {
            if !session.is_expired(self.options.ttl_secs, now) {
                return session;
            }
            debug!(session_id, "Degraded session expired");
            self.fallback_remove(session_id);
            return ConversationSession::new(session_id);
        }

        let loaded = self
            .with_retry("load", session_id, || self.backend.load(session_id))
            .await;

        match loaded {
            Ok(None) => ConversationSession::new(session_id),
            Ok(Some(stored)) => match decode(&stored) {
                Ok(session) if session.is_expired(self.options.ttl_secs, now) => {
                    debug!(session_id, "Session expired; starting fresh");
                    if let Err(e) = self.backend.delete(session_id) {
                        warn!(session_id, error = %e, "Failed to remove expired session");
                    }
                    ConversationSession::new(session_id)
                }
                Ok(session) => session,
                Err(e) => {
                    warn!(session_id, error = %e, "Discarding unreadable session snapshot");
                    ConversationSession::new(session_id)
                }
            },
            Err(e) => {
                let session = ConversationSession::new(session_id);
                self.degrade(session_id, &session, &e);
                session
            }
        }
    }

    /// Persist `session` under `session_id`, overwriting any prior snapshot.
    pub async fn put(&self, session_id: &str, session: &ConversationSession) -> Durability {
        if self.fallback_contains(session_id) {
            self.fallback_insert(session_id, session);
            return Durability::Degraded;
        }

        let stored = match encode(session_id, session) {
            Ok(stored) => stored,
            Err(e) => {
                self.degrade(session_id, session, &e);
                return Durability::Degraded;
            }
        };

        match self
            .with_retry("save", session_id, || self.backend.save(&stored))
            .await
        {
            Ok(()) => Durability::Durable,
            Err(e) => {
                self.degrade(session_id, session, &e);
                Durability::Degraded
            }
        }
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, PersistenceError> {
        let in_memory = self.fallback_remove(session_id);
        let durable = self
            .with_retry("delete", session_id, || self.backend.delete(session_id))
            .await?;
        Ok(in_memory || durable)
    }

    /// Remove every session idle for longer than the TTL. Returns the count.
    pub async fn sweep_expired(&self) -> usize {
        let now = Timestamp::now();
        let ttl = self.options.ttl_secs;
        let cutoff = Timestamp(now.0.saturating_sub(ttl as i64));

        let swept_memory = {
            let mut fallback = self.lock_fallback();
            let before = fallback.len();
            fallback.retain(|_, s| !s.is_expired(ttl, now));
            before - fallback.len()
        };

        let swept_durable = match self
            .with_retry("sweep", "*", || self.backend.delete_idle(cutoff))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Session sweep failed");
                0
            }
        };

        let total = swept_memory + swept_durable;
        if total > 0 {
            info!(swept = total, "Expired sessions removed");
        }
        total
    }

    pub async fn session_count(&self) -> Result<usize, PersistenceError> {
        let durable = self
            .with_retry("count", "*", || self.backend.count())
            .await?;
        Ok(durable + self.lock_fallback().len())
    }

    /// True while any session is running without durable persistence.
    pub fn is_degraded(&self) -> bool {
        !self.lock_fallback().is_empty()
    }

    pub fn degraded_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_fallback().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn with_retry<T>(
        &self,
        op: &str,
        session_id: &str,
        mut f: impl FnMut() -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let policy = self.options.retry;
        let mut backoff = policy.initial_backoff;
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < policy.attempts => {
                    debug!(op, session_id, attempt, error = %e, "Store operation failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn degrade(&self, session_id: &str, session: &ConversationSession, err: &PersistenceError) {
        warn!(
            session_id,
            error = %err,
            "Persistence unavailable; session continues in memory only"
        );
        self.fallback_insert(session_id, session);
    }

    fn lock_fallback(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConversationSession>> {
        self.fallback.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fallback_get(&self, session_id: &str) -> Option<ConversationSession> {
        self.lock_fallback().get(session_id).cloned()
    }

    fn fallback_contains(&self, session_id: &str) -> bool {
        self.lock_fallback().contains_key(session_id)
    }

    fn fallback_insert(&self, session_id: &str, session: &ConversationSession) {
        self.lock_fallback()
            .insert(session_id.to_string(), session.clone());
    }

    fn fallback_remove(&self, session_id: &str) -> bool {
        self.lock_fallback().remove(session_id).is_some()
    }
}

fn encode(session_id: &str, session: &ConversationSession) -> Result<StoredSnapshot, PersistenceError> {
    let mut session = session.clone();
    session.session_id = session_id.to_string();
    let last_active = session.last_active;
    let record = SessionRecord {
        schema_version: SESSION_SCHEMA_VERSION,
        session,
    };
    let snapshot = serde_json::to_string(&record).map_err(|e| PersistenceError::CorruptSnapshot {
        session_id: session_id.to_string(),
        reason: e.to_string(),
    })?;
    Ok(StoredSnapshot {
        session_id: session_id.to_string(),
        snapshot,
        schema_version: SESSION_SCHEMA_VERSION,
        last_active,
    })
}

fn decode(stored: &StoredSnapshot) -> Result<ConversationSession, PersistenceError> {
    let corrupt = |reason: String| PersistenceError::CorruptSnapshot {
        session_id: stored.session_id.clone(),
        reason,
    };

    if stored.schema_version > SESSION_SCHEMA_VERSION {
        return Err(corrupt(format!(
            "schema version {} is newer than supported version {}",
            stored.schema_version, SESSION_SCHEMA_VERSION
        )));
    }
    let record: SessionRecord =
        serde_json::from_str(&stored.snapshot).map_err(|e| corrupt(e.to_string()))?;
    if record.schema_version > SESSION_SCHEMA_VERSION {
        return Err(corrupt(format!(
            "record schema version {} is newer than supported version {}",
            record.schema_version, SESSION_SCHEMA_VERSION
        )));
    }
    if record.session.session_id != stored.session_id {
        return Err(corrupt(format!(
            "snapshot belongs to session '{}'",
            record.session.session_id
        )));
    }
    Ok(record.session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::session_repo::SessionRepository;
    use parley_core::{ParamValue, ResolutionState, Turn};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(ttl_secs: u64) -> StoreOptions {
        StoreOptions {
            ttl_secs,
            retry: RetryPolicy {
                attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        }
    }

    fn sqlite_store() -> (SessionStore, Arc<SessionRepository>) {
        let repo = Arc::new(SessionRepository::new(Arc::new(Database::in_memory().unwrap())));
        let store = SessionStore::new(repo.clone(), fast_options(1800));
        (store, repo)
    }

    /// Fails the first `failures` operations, then delegates to SQLite.
    struct FlakyBackend {
        inner: SessionRepository,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                inner: SessionRepository::new(Arc::new(Database::in_memory().unwrap())),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }

        fn gate(&self) -> Result<(), PersistenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PersistenceError::StoreUnavailable("database is locked".into()));
            }
            Ok(())
        }
    }

    impl SessionBackend for FlakyBackend {
        fn load(&self, id: &str) -> Result<Option<StoredSnapshot>, PersistenceError> {
            self.gate()?;
            self.inner.load(id)
        }
        fn save(&self, snapshot: &StoredSnapshot) -> Result<(), PersistenceError> {
            self.gate()?;
            self.inner.save(snapshot)
        }
        fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
            self.gate()?;
            self.inner.delete(id)
        }
        fn delete_idle(&self, cutoff: Timestamp) -> Result<usize, PersistenceError> {
            self.gate()?;
            self.inner.delete_idle(cutoff)
        }
        fn count(&self) -> Result<usize, PersistenceError> {
            self.gate()?;
            self.inner.count()
        }
    }

    fn busy_session(id: &str) -> ConversationSession {
        let mut session = ConversationSession::new(id);
        session.state = ResolutionState::AwaitingParameters;
        session.pending_command = Some("add".into());
        session
            .pending_slots
            .insert("a".into(), Some(ParamValue::Float(1.5)));
        session.pending_slots.insert("b".into(), None);
        for i in 0..3 {
            let seq = session.allocate_sequence();
            session.push_turn(Turn::new(seq, format!("turn {}", i)), 2);
        }
        session
    }

    // ---- round trip ----

    #[tokio::test]
    async fn test_get_missing_returns_fresh_session() {
        let (store, _) = sqlite_store();
        let session = store.get("new").await;
        assert_eq!(session.session_id, "new");
        assert_eq!(session.state, ResolutionState::AwaitingIntent);
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let (store, _) = sqlite_store();
        let session = busy_session("s1");
        assert_eq!(store.put("s1", &session).await, Durability::Durable);

        let loaded = store.get("s1").await;
        assert_eq!(loaded, session);
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.unfilled_slots(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_carries_schema_version() {
        let (store, repo) = sqlite_store();
        store.put("s1", &busy_session("s1")).await;
        let stored = repo.load("s1").unwrap().unwrap();
        assert_eq!(stored.schema_version, SESSION_SCHEMA_VERSION);
        let json: serde_json::Value = serde_json::from_str(&stored.snapshot).unwrap();
        assert_eq!(json["schema_version"], SESSION_SCHEMA_VERSION);
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["state"], "awaiting_parameters");
    }

    // ---- expiry ----

    #[tokio::test]
    async fn test_expired_session_treated_as_absent() {
        let repo = Arc::new(SessionRepository::new(Arc::new(Database::in_memory().unwrap())));
        let store = SessionStore::new(repo.clone(), fast_options(60));

        let mut session = busy_session("s1");
        session.last_active = Timestamp(Timestamp::now().0 - 120);
        store.put("s1", &session).await;

        let loaded = store.get("s1").await;
        assert_eq!(loaded.state, ResolutionState::AwaitingIntent);
        assert!(loaded.turns.is_empty());
        assert!(repo.load("s1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let repo = Arc::new(SessionRepository::new(Arc::new(Database::in_memory().unwrap())));
        let store = SessionStore::new(repo, fast_options(60));

        let mut stale = ConversationSession::new("stale");
        stale.last_active = Timestamp(Timestamp::now().0 - 600);
        store.put("stale", &stale).await;
        store.put("fresh", &ConversationSession::new("fresh")).await;

        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.session_count().await.unwrap(), 1);
    }

    // ---- corruption ----

    #[tokio::test]
    async fn test_corrupt_snapshot_replaced_by_fresh_session() {
        let (store, repo) = sqlite_store();
        repo.save(&StoredSnapshot {
            session_id: "s1".into(),
            snapshot: "{not json".into(),
            schema_version: SESSION_SCHEMA_VERSION,
            last_active: Timestamp::now(),
        })
        .unwrap();

        let session = store.get("s1").await;
        assert_eq!(session.session_id, "s1");
        assert!(session.turns.is_empty());
        assert!(!store.is_degraded());
    }

    #[test]
    fn test_decode_rejects_newer_schema() {
        let mut stored = encode("s1", &ConversationSession::new("s1")).unwrap();
        stored.schema_version = SESSION_SCHEMA_VERSION + 1;
        assert!(matches!(
            decode(&stored),
            Err(PersistenceError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_foreign_session() {
        let mut stored = encode("s1", &ConversationSession::new("s1")).unwrap();
        stored.session_id = "s2".into();
        let err = decode(&stored).unwrap_err();
        assert!(err.to_string().contains("belongs to session 's1'"));
    }

    // ---- retries and degradation ----

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let backend = Arc::new(FlakyBackend::new(2));
        let store = SessionStore::new(backend.clone(), fast_options(1800));

        assert_eq!(store.put("s1", &busy_session("s1")).await, Durability::Durable);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_to_memory() {
        let backend = Arc::new(FlakyBackend::new(3));
        let store = SessionStore::new(backend.clone(), fast_options(1800));

        let session = busy_session("s1");
        assert_eq!(store.put("s1", &session).await, Durability::Degraded);
        assert!(store.is_degraded());
        assert_eq!(store.degraded_sessions(), vec!["s1".to_string()]);

        // The backend has recovered, but the session stays in memory.
        assert_eq!(store.get("s1").await, session);
        assert_eq!(store.put("s1", &session).await, Durability::Degraded);
        assert!(backend.inner.load("s1").unwrap().is_none());

        // Other sessions still persist durably.
        assert_eq!(
            store.put("s2", &ConversationSession::new("s2")).await,
            Durability::Durable
        );
    }

    #[tokio::test]
    async fn test_failed_load_degrades_with_fresh_session() {
        let backend = Arc::new(FlakyBackend::new(10));
        let store = SessionStore::new(backend, fast_options(1800));
        let session = store.get("s1").await;
        assert!(session.turns.is_empty());
        assert!(store.is_degraded());
    }

    #[tokio::test]
    async fn test_delete_clears_degraded_session() {
        let backend = Arc::new(FlakyBackend::new(3));
        let store = SessionStore::new(backend, fast_options(1800));
        store.put("s1", &busy_session("s1")).await;
        assert!(store.is_degraded());
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.is_degraded());
    }
}

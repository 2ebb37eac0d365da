use parley_core::ParleyError;

/// Errors from the persistence layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistenceError {
    /// The backing store could not be reached or the operation failed.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored snapshot could not be decoded.
    #[error("Corrupt snapshot for session '{session_id}': {reason}")]
    CorruptSnapshot { session_id: String, reason: String },
}

impl PersistenceError {
    /// Only availability failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::StoreUnavailable(err.to_string())
    }
}

impl From<PersistenceError> for ParleyError {
    fn from(err: PersistenceError) -> Self {
        ParleyError::Storage(err.to_string())
    }
}

use parley_core::ParleyError;

/// Errors from the embedding index.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding has {actual} dimensions, provider declares {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Outcomes of intent resolution that need the user's help.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("No command matched the utterance")]
    NoMatch { best_score: Option<f64> },

    #[error("Utterance matches several commands: {}", candidates.join(", "))]
    AmbiguousMatch { candidates: Vec<String> },
}

impl From<IndexError> for ParleyError {
    fn from(err: IndexError) -> Self {
        ParleyError::Embedding(err.to_string())
    }
}

//! Parley Vector crate - embedding provider seam, command embedding index,
//! and intent matching.
//!
//! Commands are embedded once per content fingerprint and ranked against an
//! utterance's embedding by cosine similarity. When the embedding provider is
//! unavailable the matcher falls back to name matching.

pub mod embedding;
pub mod error;
pub mod indexer;
pub mod matcher;

pub use embedding::{DynEmbeddingProvider, EmbeddingProvider, KeywordEmbedding, MockEmbedding};
pub use error::{IndexError, ResolutionError};
pub use indexer::EmbeddingIndexer;
pub use matcher::{cosine_similarity, IntentMatch, IntentMatcher, MatchOutcome, MatchParams, Resolution};

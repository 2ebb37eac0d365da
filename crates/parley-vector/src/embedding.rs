//! Embedding provider trait and local implementations.
//!
//! - `KeywordEmbedding` hashes a bag of keywords into a fixed-size unit
//!   vector. Optional concepts fold synonyms onto one dimension and restrict
//!   the vocabulary, which is enough for small offline command sets.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use parley_core::ParleyError;

/// Capability that turns text into a fixed-dimensional vector.
///
/// Local or remote implementations are interchangeable; the core imposes no
/// transport on them.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, ParleyError>> + Send;

    /// Dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Object-safe companion of [`EmbeddingProvider`].
///
/// `EmbeddingProvider::embed` returns `impl Future` and so cannot be used as a
/// trait object. Every provider gets this trait through the blanket impl.
pub trait DynEmbeddingProvider: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingProvider> DynEmbeddingProvider for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingProvider::dimensions(self)
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Bucket positions end up in the persistent embedding cache,
/// so they must not change between builds or toolchains.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

fn bucket(token: &str, dimensions: usize) -> usize {
    (fnv1a(token.as_bytes()) % dimensions as u64) as usize
}

// ---------------------------------------------------------------------------
// KeywordEmbedding
// ---------------------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "could", "do", "for", "from", "how",
    "i", "in", "is", "it", "its", "me", "my", "of", "on", "or", "please", "s", "should", "so",
    "that", "the", "this", "to", "what", "whats", "when", "will", "with", "would", "you",
];

/// Hashed bag-of-keywords embedding.
#[derive(Debug, Clone)]
pub struct KeywordEmbedding {
    dimensions: usize,
    /// word -> concept. When non-empty, words outside it are ignored.
    concepts: HashMap<String, String>,
}

impl KeywordEmbedding {
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Open-vocabulary embedding over every non-stopword token.
    pub fn new() -> Self {
        Self::with_dimensions(Self::DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            concepts: HashMap::new(),
        }
    }

    /// Map `concept` and each of `words` onto the same dimension.
    ///
    /// Once any concept is declared, tokens outside the declared words no
    /// longer contribute.
    pub fn concept(mut self, concept: &str, words: &[&str]) -> Self {
        let concept = concept.to_lowercase();
        self.concepts.insert(concept.clone(), concept.clone());
        for word in words {
            self.concepts.insert(word.to_lowercase(), concept.clone());
        }
        self
    }

    /// Lowercased keywords of `text` after stopword removal and concept folding.
    pub fn keywords(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .replace('\'', "")
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
            .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|t| {
                if self.concepts.is_empty() {
                    Some(t.to_string())
                } else {
                    self.concepts.get(t).cloned()
                }
            })
            .collect()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for keyword in self.keywords(text) {
            v[bucket(&keyword, self.dimensions)] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for KeywordEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for KeywordEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Deterministic 384-dimensional vectors derived from a hash of the input.
///
/// Identical inputs always produce identical unit vectors; distinct inputs
/// are close to orthogonal.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub const DIMENSIONS: usize = 384;

    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(Self::DIMENSIONS);
        for i in 0..Self::DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        if text.is_empty() {
            return Err(ParleyError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }
}

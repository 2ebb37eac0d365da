//! Command embedding index.
//!
//! Embeddings are keyed by the command's content fingerprint, so a command is
//! re-embedded only when its name, signature, or description changes. Lookups
//! go to the in-memory map first, then the optional persistent cache, then the
//! provider.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use parley_action::{CommandSpec, RegistrySnapshot};
use parley_core::Fingerprint;
use parley_storage::EmbeddingCacheRepository;
use tracing::{debug, info, warn};

use crate::embedding::DynEmbeddingProvider;
use crate::error::IndexError;

pub struct EmbeddingIndexer {
    provider: Arc<dyn DynEmbeddingProvider>,
    model: String,
    vectors: RwLock<HashMap<Fingerprint, Arc<Vec<f32>>>>,
    persistent: Option<EmbeddingCacheRepository>,
}

impl EmbeddingIndexer {
    /// `model` identifies the provider's vector space and keys the persistent cache.
    pub fn new(provider: Arc<dyn DynEmbeddingProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            vectors: RwLock::new(HashMap::new()),
            persistent: None,
        }
    }

    pub fn with_persistent_cache(mut self, repo: EmbeddingCacheRepository) -> Self {
        self.persistent = Some(repo);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Text embedded for a command: spaced name, description, parameter names.
    pub fn embedding_text(spec: &CommandSpec) -> String {
        let mut text = spec.name.replace('_', " ");
        if !spec.description.is_empty() {
            text.push_str(": ");
            text.push_str(&spec.description);
        }
        for param in &spec.params {
            text.push(' ');
            text.push_str(&param.name.replace('_', " "));
            if !param.description.is_empty() {
                text.push(' ');
                text.push_str(&param.description);
            }
        }
        text
    }

    /// Return the embedding for `spec`, computing it only on a fingerprint miss.
    pub async fn ensure_embedding(&self, spec: &CommandSpec) -> Result<Arc<Vec<f32>>, IndexError> {
        if let Some(v) = self.cached(&spec.fingerprint) {
            return Ok(v);
        }

        if let Some(repo) = &self.persistent {
            match repo.get(spec.fingerprint.as_str(), &self.model) {
                Ok(Some(vector)) if vector.len() == self.provider.dimensions() => {
                    debug!(command = %spec.name, "Embedding loaded from persistent cache");
                    return Ok(self.remember(&spec.fingerprint, vector));
                }
                Ok(_) => {}
                Err(e) => warn!(command = %spec.name, error = %e, "Embedding cache read failed"),
            }
        }

        let vector = self.embed(&Self::embedding_text(spec)).await?;
        debug!(
            command = %spec.name,
            fingerprint = spec.fingerprint.short(),
            "Command embedded"
        );

        if let Some(repo) = &self.persistent {
            if let Err(e) = repo.put(spec.fingerprint.as_str(), &self.model, &vector) {
                warn!(command = %spec.name, error = %e, "Embedding cache write failed");
            }
        }
        Ok(self.remember(&spec.fingerprint, vector))
    }

    /// Embed every command in the snapshot. Returns the number embedded.
    pub async fn warm(&self, snapshot: &RegistrySnapshot) -> Result<usize, IndexError> {
        for spec in snapshot.iter() {
            self.ensure_embedding(spec).await?;
        }
        info!(commands = snapshot.len(), model = %self.model, "Embedding index warmed");
        Ok(snapshot.len())
    }

    /// Embed free text such as an utterance.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let vector = self
            .provider
            .embed_boxed(text)
            .await
            .map_err(|e| IndexError::EmbeddingUnavailable(e.to_string()))?;
        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    pub fn cached_count(&self) -> usize {
        self.vectors.read().map(|m| m.len()).unwrap_or(0)
    }

    fn cached(&self, fingerprint: &Fingerprint) -> Option<Arc<Vec<f32>>> {
        self.vectors
            .read()
            .ok()
            .and_then(|m| m.get(fingerprint).cloned())
    }

    fn remember(&self, fingerprint: &Fingerprint, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let vector = Arc::new(vector);
        if let Ok(mut m) = self.vectors.write() {
            m.insert(fingerprint.clone(), Arc::clone(&vector));
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, MockEmbedding};
    use parley_action::{handler_fn, CommandArgs, CommandOutput, CommandRegistry};
    use parley_core::{ParamSpec, ParamType, ParleyError};
    use parley_storage::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts provider calls.
    #[derive(Default)]
    struct CountingEmbedding {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            MockEmbedding::new().embed(text).await
        }

        fn dimensions(&self) -> usize {
            MockEmbedding::DIMENSIONS
        }
    }

    struct DownEmbedding;

    impl EmbeddingProvider for DownEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ParleyError> {
            Err(ParleyError::Embedding("provider offline".into()))
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn weather_spec(description: &str) -> CommandSpec {
        CommandSpec::new(
            "get_weather",
            handler_fn(|_a: CommandArgs| async move { Ok(CommandOutput::text("ok")) }),
            vec![ParamSpec::required("location", ParamType::String)],
            description,
        )
        .unwrap()
    }

    #[test]
    fn test_embedding_text() {
        let spec = weather_spec("Current weather");
        assert_eq!(
            EmbeddingIndexer::embedding_text(&spec),
            "get weather: Current weather location"
        );
    }

    #[tokio::test]
    async fn test_embedding_reused_for_same_fingerprint() {
        let provider = Arc::new(CountingEmbedding::default());
        let indexer = EmbeddingIndexer::new(provider.clone(), "mock");
        let spec = weather_spec("Current weather");

        let a = indexer.ensure_embedding(&spec).await.unwrap();
        let b = indexer.ensure_embedding(&spec).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_change_recomputes() {
        let provider = Arc::new(CountingEmbedding::default());
        let indexer = EmbeddingIndexer::new(provider.clone(), "mock");

        let a = indexer.ensure_embedding(&weather_spec("Current weather")).await.unwrap();
        let b = indexer.ensure_embedding(&weather_spec("Forecast")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(indexer.cached_count(), 2);
    }

    #[tokio::test]
    async fn test_persistent_cache_survives_new_indexer() {
        let db = Arc::new(Database::in_memory().unwrap());
        let spec = weather_spec("Current weather");

        let first = Arc::new(CountingEmbedding::default());
        let indexer = EmbeddingIndexer::new(first.clone(), "mock")
            .with_persistent_cache(EmbeddingCacheRepository::new(db.clone()));
        let original = indexer.ensure_embedding(&spec).await.unwrap();

        let second = Arc::new(CountingEmbedding::default());
        let indexer = EmbeddingIndexer::new(second.clone(), "mock")
            .with_persistent_cache(EmbeddingCacheRepository::new(db.clone()));
        let reloaded = indexer.ensure_embedding(&spec).await.unwrap();

        assert_eq!(original, reloaded);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);

        // A different model misses the cache.
        let third = Arc::new(CountingEmbedding::default());
        let indexer = EmbeddingIndexer::new(third.clone(), "other-model")
            .with_persistent_cache(EmbeddingCacheRepository::new(db));
        indexer.ensure_embedding(&spec).await.unwrap();
        assert_eq!(third.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_embedding_unavailable() {
        let indexer = EmbeddingIndexer::new(Arc::new(DownEmbedding), "down");
        let err = indexer
            .ensure_embedding(&weather_spec("Current weather"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::EmbeddingUnavailable(_)));
        assert_eq!(indexer.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_warm_embeds_registry() {
        let registry = CommandRegistry::new();
        for name in ["one", "two", "three"] {
            registry
                .register(
                    name,
                    handler_fn(|_a: CommandArgs| async move { Ok(CommandOutput::text("ok")) }),
                    vec![],
                    format!("command {}", name),
                )
                .unwrap();
        }
        let indexer = EmbeddingIndexer::new(Arc::new(MockEmbedding::new()), "mock");
        assert_eq!(indexer.warm(&registry.list()).await.unwrap(), 3);
        assert_eq!(indexer.cached_count(), 3);
    }
}

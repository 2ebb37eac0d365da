use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Backend identifier selecting a non-durable in-memory store.
pub const IN_MEMORY_BACKEND: &str = ":memory:";

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one stage of the dispatch pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.similarity_threshold) {
            return Err(ParleyError::Config(format!(
                "matching.similarity_threshold must be within [0, 1], got {}",
                m.similarity_threshold
            )));
        }
        if m.ambiguity_margin < 0.0 || !m.ambiguity_margin.is_finite() {
            return Err(ParleyError::Config(format!(
                "matching.ambiguity_margin must be a non-negative number, got {}",
                m.ambiguity_margin
            )));
        }
        if m.top_k == 0 {
            return Err(ParleyError::Config("matching.top_k must be at least 1".into()));
        }
        if self.session.max_history_turns == 0 {
            return Err(ParleyError::Config(
                "session.max_history_turns must be at least 1".into(),
            ));
        }
        if self.storage.retry_attempts == 0 {
            return Err(ParleyError::Config(
                "storage.retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Intent matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Identifier of the embedding model; part of the embedding cache key.
    pub embedding_model: String,
    /// Minimum cosine similarity for the top candidate to count as a match.
    pub similarity_threshold: f64,
    /// Minimum gap between the top two scores for an unambiguous match.
    pub ambiguity_margin: f64,
    /// Number of candidates offered when a match is ambiguous.
    pub top_k: usize,
    /// Fall back to command-name matching when embeddings are unavailable.
    pub name_match_fallback: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            embedding_model: "keyword-fnv1a-256".to_string(),
            similarity_threshold: 0.6,
            ambiguity_margin: 0.05,
            top_k: 3,
            name_match_fallback: true,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is treated as absent.
    pub ttl_secs: u64,
    /// Maximum turns kept per session; older turns are dropped.
    pub max_history_turns: usize,
    /// Interval of the background expiry sweep. 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            max_history_turns: 20,
            sweep_interval_secs: 300,
        }
    }
}

/// Parameter extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Budget for one extraction pass across all pending slots.
    pub timeout_ms: u64,
    /// Extra generator attempts after a coercion failure before re-prompting.
    pub coercion_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            coercion_retries: 0,
        }
    }
}

/// Command execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Budget for a single command invocation.
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `":memory:"` or a SQLite database path (`~` is expanded).
    pub cache_backend: String,
    /// Attempts per persistence operation before degrading.
    pub retry_attempts: u32,
    /// Initial backoff between attempts; doubles per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_backend: "~/.parley/parley.db".to_string(),
            retry_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl StorageConfig {
    pub fn is_in_memory(&self) -> bool {
        self.cache_backend == IN_MEMORY_BACKEND
    }

    /// Database path with a leading `~` expanded to the home directory.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.cache_backend)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let home_var = if cfg!(target_os = "windows") {
        "USERPROFILE"
    } else {
        "HOME"
    };
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var(home_var) {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var(home_var) {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ParleyConfig::default();
        assert_eq!(config.matching.similarity_threshold, 0.6);
        assert_eq!(config.matching.ambiguity_margin, 0.05);
        assert_eq!(config.matching.top_k, 3);
        assert_eq!(config.session.ttl_secs, 1800);
        assert_eq!(config.session.max_history_turns, 20);
        assert_eq!(config.extraction.coercion_retries, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_str = r#"
            [matching]
            similarity_threshold = 0.75

            [session]
            max_history_turns = 5
        "#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.matching.similarity_threshold, 0.75);
        assert_eq!(config.matching.ambiguity_margin, 0.05);
        assert_eq!(config.session.max_history_turns, 5);
        assert_eq!(config.session.ttl_secs, 1800);
        assert_eq!(config.storage.retry_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = ParleyConfig::default();
        config.matching.similarity_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_validate_rejects_negative_margin() {
        let mut config = ParleyConfig::default();
        config.matching.ambiguity_margin = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let mut config = ParleyConfig::default();
        config.session.max_history_turns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ParleyConfig::default();
        config.matching.embedding_model = "test-model".into();
        config.storage.cache_backend = IN_MEMORY_BACKEND.into();
        config.save(&path).unwrap();

        let loaded = ParleyConfig::load(&path).unwrap();
        assert_eq!(loaded.matching.embedding_model, "test-model");
        assert!(loaded.storage.is_in_memory());
    }

    #[test]
    fn test_load_invalid_values_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[matching]\nsimilarity_threshold = -1.0\n").unwrap();
        assert!(ParleyConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ParleyConfig::load_or_default(Path::new("/nonexistent/parley.toml"));
        assert_eq!(config.matching.top_k, 3);
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("/tmp/parley.db"), PathBuf::from("/tmp/parley.db"));
        assert_eq!(expand_home(":memory:"), PathBuf::from(":memory:"));
    }
}

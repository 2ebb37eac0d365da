//! Intent matching.
//!
//! Scores every registered command against an utterance and classifies the
//! ranking as resolved, ambiguous, or no match. Ranking is by score
//! descending, then registration order ascending, so equal scores always
//! resolve the same way.

use std::cmp::Ordering;
use std::sync::Arc;

use parley_action::{CommandRegistry, CommandSpec, RegistrySnapshot};
use parley_core::config::MatchingConfig;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{IndexError, ResolutionError};
use crate::indexer::EmbeddingIndexer;

/// Name-fallback score for a whole-word occurrence of the command name.
pub const NAME_WORD_SCORE: f64 = 0.9;
/// Name-fallback score for a substring occurrence of the command name.
pub const NAME_SUBSTRING_SCORE: f64 = 0.7;

/// Cosine similarity in f64. Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Classification parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub top_k: usize,
    pub threshold: f64,
    pub ambiguity_margin: f64,
}

impl MatchParams {
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            top_k: config.top_k.max(1),
            threshold: config.similarity_threshold,
            ambiguity_margin: config.ambiguity_margin,
        }
    }
}

impl Default for MatchParams {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

/// One scored candidate. Never persisted.
#[derive(Debug, Clone)]
pub struct IntentMatch {
    pub command: Arc<CommandSpec>,
    pub score: f64,
    /// 1-based position in the ranking.
    pub rank: usize,
}

impl IntentMatch {
    pub fn name(&self) -> &str {
        &self.command.name
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(IntentMatch),
    /// Close competitors, best first.
    Ambiguous(Vec<IntentMatch>),
    NoMatch { best: Option<IntentMatch> },
}

impl Resolution {
    pub fn into_result(self) -> Result<IntentMatch, ResolutionError> {
        match self {
            Resolution::Resolved(m) => Ok(m),
            Resolution::Ambiguous(candidates) => Err(ResolutionError::AmbiguousMatch {
                candidates: candidates.iter().map(|c| c.command.name.clone()).collect(),
            }),
            Resolution::NoMatch { best } => Err(ResolutionError::NoMatch {
                best_score: best.map(|b| b.score),
            }),
        }
    }
}

/// Resolution plus whether it came from the name fallback.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub resolution: Resolution,
    pub degraded: bool,
}

pub struct IntentMatcher {
    registry: Arc<CommandRegistry>,
    indexer: Arc<EmbeddingIndexer>,
    name_match_fallback: bool,
}

impl IntentMatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        indexer: Arc<EmbeddingIndexer>,
        name_match_fallback: bool,
    ) -> Self {
        Self {
            registry,
            indexer,
            name_match_fallback,
        }
    }

    pub fn indexer(&self) -> &Arc<EmbeddingIndexer> {
        &self.indexer
    }

    /// Resolve `utterance` to a command.
    ///
    /// Fails with `EmbeddingUnavailable` only when the provider is down and
    /// the name fallback is disabled.
    pub async fn resolve(
        &self,
        utterance: &str,
        params: &MatchParams,
    ) -> Result<MatchOutcome, IndexError> {
        let snapshot = self.registry.list();

        match self.score_by_embedding(utterance, &snapshot).await {
            Ok(scored) => Ok(MatchOutcome {
                resolution: classify(rank(scored), params),
                degraded: false,
            }),
            Err(e) if self.name_match_fallback => {
                warn!(error = %e, "Embeddings unavailable; matching on command names");
                let scored = score_by_name(utterance, &snapshot);
                Ok(MatchOutcome {
                    resolution: classify(rank(scored), params),
                    degraded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn score_by_embedding(
        &self,
        utterance: &str,
        snapshot: &RegistrySnapshot,
    ) -> Result<Vec<(usize, Arc<CommandSpec>, f64)>, IndexError> {
        let query = self.indexer.embed(utterance).await?;
        let mut scored = Vec::with_capacity(snapshot.len());
        for (order, spec) in snapshot.iter().enumerate() {
            let vector = self.indexer.ensure_embedding(spec).await?;
            scored.push((order, Arc::clone(spec), cosine_similarity(&query, &vector)));
        }
        Ok(scored)
    }
}

/// Score commands by the presence of their name in the utterance.
fn score_by_name(utterance: &str, snapshot: &RegistrySnapshot) -> Vec<(usize, Arc<CommandSpec>, f64)> {
    let text = utterance.to_lowercase();
    snapshot
        .iter()
        .enumerate()
        .filter_map(|(order, spec)| {
            let raw = spec.name.to_lowercase();
            let spaced = raw.replace('_', " ");
            let score = if contains_word(&text, &spaced) || contains_word(&text, &raw) {
                NAME_WORD_SCORE
            } else if text.contains(&raw) || text.contains(&spaced) {
                NAME_SUBSTRING_SCORE
            } else {
                return None;
            };
            Some((order, Arc::clone(spec), score))
        })
        .collect()
}

fn contains_word(text: &str, phrase: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(phrase)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Order by score descending, then registration order ascending.
fn rank(mut scored: Vec<(usize, Arc<CommandSpec>, f64)>) -> Vec<IntentMatch> {
    scored.sort_by(|a, b| match b.2.total_cmp(&a.2) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (_, command, score))| IntentMatch {
            command,
            score,
            rank: i + 1,
        })
        .collect()
}

/// Apply threshold and ambiguity margin to a ranked list.
///
/// Ambiguous results carry the first `top_k` ranked candidates, and never
/// fewer than the top two.
fn classify(ranked: Vec<IntentMatch>, params: &MatchParams) -> Resolution {
    let mut iter = ranked.into_iter();
    let top = match iter.next() {
        Some(top) => top,
        None => return Resolution::NoMatch { best: None },
    };

    if top.score < params.threshold {
        debug!(best = %top.command.name, score = top.score, "No command above threshold");
        return Resolution::NoMatch { best: Some(top) };
    }

    let rest: Vec<IntentMatch> = iter.collect();
    let contested = rest
        .first()
        .map(|second| top.score - second.score < params.ambiguity_margin)
        .unwrap_or(false);
    if !contested {
        debug!(command = %top.command.name, score = top.score, "Resolved");
        return Resolution::Resolved(top);
    }

    let mut candidates = vec![top];
    candidates.extend(rest.into_iter().take(params.top_k.max(2) - 1));
    debug!(
        candidates = candidates.len(),
        score = candidates[0].score,
        "Ambiguous match"
    );
    Resolution::Ambiguous(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, KeywordEmbedding};
    use parley_action::{handler_fn, CommandArgs, CommandOutput};
    use parley_core::ParleyError;

    fn spec(name: &str) -> Arc<CommandSpec> {
        Arc::new(
            CommandSpec::new(
                name,
                handler_fn(|_a: CommandArgs| async move { Ok(CommandOutput::text("ok")) }),
                vec![],
                "",
            )
            .unwrap(),
        )
    }

    fn scored(entries: &[(&str, f64)]) -> Vec<(usize, Arc<CommandSpec>, f64)> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (name, score))| (i, spec(name), *score))
            .collect()
    }

    fn params(threshold: f64, margin: f64) -> MatchParams {
        MatchParams {
            top_k: 3,
            threshold,
            ambiguity_margin: margin,
        }
    }

    fn names(matches: &[IntentMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.name()).collect()
    }

    // ---- cosine ----

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    // ---- ranking and classification ----

    #[test]
    fn test_rank_breaks_ties_by_registration_order() {
        let ranked = rank(scored(&[("late", 0.5), ("first", 0.8), ("second", 0.8)]));
        assert_eq!(names(&ranked), vec!["first", "second", "late"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn test_classify_resolved() {
        let ranked = rank(scored(&[("get_weather", 0.92), ("add", 0.31)]));
        match classify(ranked, &params(0.6, 0.05)) {
            Resolution::Resolved(m) => {
                assert_eq!(m.name(), "get_weather");
                assert!((m.score - 0.92).abs() < 1e-12);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_no_match_below_threshold() {
        let ranked = rank(scored(&[("get_weather", 0.2)]));
        match classify(ranked, &params(0.6, 0.05)) {
            Resolution::NoMatch { best } => assert_eq!(best.unwrap().name(), "get_weather"),
            other => panic!("expected NoMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_empty_registry() {
        assert!(matches!(
            classify(vec![], &params(0.6, 0.05)),
            Resolution::NoMatch { best: None }
        ));
    }

    #[test]
    fn test_classify_ambiguous_in_stable_order() {
        let ranked = rank(scored(&[("b_cmd", 0.80), ("a_cmd", 0.82), ("far", 0.1)]));
        match classify(ranked, &params(0.6, 0.05)) {
            Resolution::Ambiguous(c) => assert_eq!(names(&c), vec!["a_cmd", "b_cmd", "far"]),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_equal_scores_ambiguous_by_registration_order() {
        let ranked = rank(scored(&[("x", 0.7), ("y", 0.7)]));
        match classify(ranked, &params(0.6, 0.05)) {
            Resolution::Ambiguous(c) => assert_eq!(names(&c), vec!["x", "y"]),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_ambiguous_caps_at_top_k() {
        let ranked = rank(scored(&[
            ("a", 0.90),
            ("b", 0.89),
            ("c", 0.88),
            ("d", 0.87),
        ]));
        let mut p = params(0.6, 0.05);
        p.top_k = 3;
        match classify(ranked, &p) {
            Resolution::Ambiguous(c) => assert_eq!(names(&c), vec!["a", "b", "c"]),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_ambiguous_offers_top_k_beyond_margin() {
        let ranked = rank(scored(&[("a", 0.90), ("b", 0.88), ("c", 0.70), ("d", 0.65)]));
        match classify(ranked, &params(0.6, 0.05)) {
            Resolution::Ambiguous(c) => assert_eq!(names(&c), vec!["a", "b", "c"]),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_ambiguous_offers_two_even_when_top_k_is_one() {
        let ranked = rank(scored(&[("a", 0.90), ("b", 0.89), ("c", 0.88)]));
        let mut p = params(0.6, 0.05);
        p.top_k = 1;
        match classify(ranked, &p) {
            Resolution::Ambiguous(c) => assert_eq!(names(&c), vec!["a", "b"]),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_into_result() {
        let ranked = rank(scored(&[("a", 0.7), ("b", 0.69)]));
        let err = classify(ranked, &params(0.6, 0.05)).into_result().unwrap_err();
        assert_eq!(
            err,
            ResolutionError::AmbiguousMatch {
                candidates: vec!["a".into(), "b".into()],
            }
        );
    }

    // ---- name fallback ----

    #[test]
    fn test_score_by_name() {
        let registry = CommandRegistry::new();
        for name in ["get_weather", "add", "set_reminder"] {
            registry
                .register(
                    name,
                    handler_fn(|_a: CommandArgs| async move { Ok(CommandOutput::text("ok")) }),
                    vec![],
                    "",
                )
                .unwrap();
        }
        let snapshot = registry.list();

        let s = score_by_name("please get weather for Paris", &snapshot);
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].1.name, "get_weather");
        assert_eq!(s[0].2, NAME_WORD_SCORE);

        let s = score_by_name("run set_reminder now", &snapshot);
        assert_eq!(s[0].1.name, "set_reminder");
        assert_eq!(s[0].2, NAME_WORD_SCORE);

        let s = score_by_name("addition please", &snapshot);
        assert_eq!(s[0].1.name, "add");
        assert_eq!(s[0].2, NAME_SUBSTRING_SCORE);

        assert!(score_by_name("hello", &snapshot).is_empty());
    }

    // ---- end to end ----

    struct DownEmbedding;

    impl EmbeddingProvider for DownEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ParleyError> {
            Err(ParleyError::Embedding("offline".into()))
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    fn demo_registry() -> Arc<CommandRegistry> {
        let registry = Arc::new(CommandRegistry::new());
        let ok = || handler_fn(|_a: CommandArgs| async move { Ok(CommandOutput::text("ok")) });
        registry
            .register("get_weather", ok(), vec![], "Weather forecast for a city")
            .unwrap();
        registry
            .register("add", ok(), vec![], "Add two numbers together")
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_resolve_with_keyword_embeddings() {
        let provider = KeywordEmbedding::new()
            .concept("weather", &["forecast", "sunny"])
            .concept("add", &["plus", "sum"]);
        let indexer = Arc::new(EmbeddingIndexer::new(Arc::new(provider), "keyword"));
        let matcher = IntentMatcher::new(demo_registry(), indexer, true);

        let outcome = matcher
            .resolve("what's the weather in Paris?", &MatchParams::default())
            .await
            .unwrap();
        assert!(!outcome.degraded);
        match outcome.resolution {
            Resolution::Resolved(m) => assert_eq!(m.name(), "get_weather"),
            other => panic!("expected Resolved, got {other:?}"),
        }

        let outcome = matcher
            .resolve("tell me a joke", &MatchParams::default())
            .await
            .unwrap();
        assert!(matches!(outcome.resolution, Resolution::NoMatch { .. }));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_names_when_degraded() {
        let indexer = Arc::new(EmbeddingIndexer::new(Arc::new(DownEmbedding), "down"));
        let matcher = IntentMatcher::new(demo_registry(), indexer, true);

        let outcome = matcher
            .resolve("get weather in Paris", &MatchParams::default())
            .await
            .unwrap();
        assert!(outcome.degraded);
        match outcome.resolution {
            Resolution::Resolved(m) => assert_eq!(m.name(), "get_weather"),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_without_fallback_surfaces_error() {
        let indexer = Arc::new(EmbeddingIndexer::new(Arc::new(DownEmbedding), "down"));
        let matcher = IntentMatcher::new(demo_registry(), indexer, false);
        let err = matcher
            .resolve("get weather", &MatchParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::EmbeddingUnavailable(_)));
    }
}

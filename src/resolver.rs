//! Feature resolution over the inference service's search and lookup.
//!
//! No local re-ranking: search order is the service's order. Label
//! matching against an already-fetched candidate set runs a fixed
//! priority chain (exact, substring containment, word overlap) with the
//! first hit winning.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, SteerError};
use crate::features::Feature;
use crate::inference::{InferenceClient, ModelSpec, TOP_K_MAX};

/// Canonical default for user-facing search and inspection.
pub const DEFAULT_TOP_K: usize = 20;

/// Resolves free-text queries, labels, and ids to canonical features.
pub struct FeatureResolver {
    inference: Arc<dyn InferenceClient>,
}

impl FeatureResolver {
    pub fn new(inference: Arc<dyn InferenceClient>) -> Self {
        Self { inference }
    }

    /// Validate and clamp a requested `top_k` into (0, 100].
    pub fn clamp_top_k(top_k: Option<usize>) -> Result<usize> {
        let k = top_k.unwrap_or(DEFAULT_TOP_K);
        if k == 0 {
            return Err(SteerError::validation("top_k must be positive"));
        }
        Ok(k.min(TOP_K_MAX))
    }

    /// Semantic feature search, delegated to the service.
    pub async fn search(
        &self,
        spec: &ModelSpec,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<Feature>> {
        if query.trim().is_empty() {
            return Err(SteerError::validation("query must not be empty"));
        }
        let top_k = Self::clamp_top_k(top_k)?;
        tracing::debug!(query, top_k, "feature search");
        self.inference.search(spec, query, top_k).await
    }

    /// Resolve a human label to its best-matching feature.
    pub async fn resolve_label(&self, spec: &ModelSpec, label: &str) -> Result<Feature> {
        let results = self.search(spec, label, Some(1)).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| SteerError::FeatureNotFound {
                label: label.to_string(),
            })
    }

    /// Direct lookup by id, preserving the input order.
    ///
    /// Unmatched ids are silently dropped; a shorter result is partial
    /// success, not an error.
    pub async fn resolve_by_id(&self, ids: &[String]) -> Result<Vec<Feature>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = self.inference.features_by_id(ids).await?;
        let mut ordered = Vec::with_capacity(found.len());
        for id in ids {
            if let Some(pos) = found.iter().position(|f| &f.id == id) {
                ordered.push(found.swap_remove(pos));
            }
        }
        Ok(ordered)
    }
}

/// Match a label against candidates: exact match, then substring
/// containment in either direction, then ≥50% word overlap. First hit
/// wins at each priority level.
pub fn match_label<'a>(label: &str, candidates: &'a [Feature]) -> Option<&'a Feature> {
    let needle = label.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    if let Some(hit) = candidates
        .iter()
        .find(|f| f.label.trim().to_lowercase() == needle)
    {
        return Some(hit);
    }

    if let Some(hit) = candidates.iter().find(|f| {
        let hay = f.label.to_lowercase();
        hay.contains(&needle) || needle.contains(&hay)
    }) {
        return Some(hit);
    }

    let needle_words: HashSet<&str> = needle.split_whitespace().collect();
    candidates.iter().find(|f| {
        let hay = f.label.to_lowercase();
        let hay_words: HashSet<&str> = hay.split_whitespace().collect();
        let overlap = needle_words.intersection(&hay_words).count();
        overlap as f64 >= (needle_words.len() as f64 * 0.5).max(1.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockInference;

    fn spec() -> ModelSpec {
        ModelSpec::new("test-model", Vec::new())
    }

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(FeatureResolver::clamp_top_k(None).unwrap(), DEFAULT_TOP_K);
        assert_eq!(FeatureResolver::clamp_top_k(Some(500)).unwrap(), TOP_K_MAX);
        assert_eq!(FeatureResolver::clamp_top_k(Some(1)).unwrap(), 1);
        assert!(FeatureResolver::clamp_top_k(Some(0)).is_err());
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let resolver = FeatureResolver::new(Arc::new(MockInference::default()));
        assert!(resolver.search(&spec(), "  ", None).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_label_not_found() {
        let resolver = FeatureResolver::new(Arc::new(MockInference::default()));
        let err = resolver.resolve_label(&spec(), "humor").await.unwrap_err();
        assert!(matches!(err, SteerError::FeatureNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_by_id_partial_in_order() {
        let mock = MockInference::default()
            .with_feature(Feature::new("a", "alpha"))
            .with_feature(Feature::new("b", "beta"));
        let resolver = FeatureResolver::new(Arc::new(mock));

        let ids = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let features = resolver.resolve_by_id(&ids).await.unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].id, "a");
        assert_eq!(features[1].id, "b");
    }

    #[test]
    fn test_match_label_priority() {
        let candidates = vec![
            Feature::new("f1", "formal writing style"),
            Feature::new("f2", "formal writing"),
            Feature::new("f3", "writing"),
        ];
        // Exact beats substring even though f1 appears first.
        assert_eq!(match_label("Formal Writing", &candidates).unwrap().id, "f2");
        // Substring containment.
        assert_eq!(match_label("good writing", &candidates).unwrap().id, "f3");
        // Word overlap (≥50%).
        assert_eq!(match_label("style formal tone", &candidates).unwrap().id, "f1");
        // No match.
        assert!(match_label("pirate speak", &candidates).is_none());
    }
}

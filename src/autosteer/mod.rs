//! Auto-steer pipeline.
//!
//! Derives 1–2 feature edits from a free-text query without manual
//! search, in five stages: intent/persona synthesis, keyword-length
//! guard, feature search, feature selection, and edit application. Each
//! stage may fail independently; failure short-circuits to an
//! unsuccessful [`AutoSteerRun`] carrying whatever partial data exists,
//! never an error. The pipeline proposes pending edits only — committing
//! stays with the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::{
    self, AnalysisClient, IntentSynthesis, Persona, Selection, INTENT_JSON_SUFFIX, INTENT_SYSTEM,
    SELECTION_JSON_SUFFIX, SELECTION_SYSTEM,
};
use crate::features::{Feature, FeatureEdit};
use crate::inference::{ChatMessage, InferenceClient, ModelSpec};
use crate::resolver::match_label;
use crate::variant::{SteeringLedger, VariantStore};

/// The search service's query length limit.
pub const QUERY_MAX_LEN: usize = 100;
/// Fixed fan-out for the pipeline's single search call.
pub const SEARCH_TOP_K: usize = 10;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoSteerRun {
    pub success: bool,
    /// Keywords actually used for the search, post-truncation.
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
    /// Edits proposed onto the target variant's pending map.
    pub applied: Vec<FeatureEdit>,
}

impl AutoSteerRun {
    fn unsuccessful(keywords: Vec<String>, persona: Option<Persona>) -> Self {
        Self {
            success: false,
            keywords,
            persona,
            applied: Vec::new(),
        }
    }
}

/// Five-stage auto-steer orchestration.
pub struct AutoSteerPipeline {
    analysis: Arc<dyn AnalysisClient>,
    inference: Arc<dyn InferenceClient>,
    store: Arc<VariantStore>,
    ledger: Arc<SteeringLedger>,
}

impl AutoSteerPipeline {
    pub fn new(
        analysis: Arc<dyn AnalysisClient>,
        inference: Arc<dyn InferenceClient>,
        store: Arc<VariantStore>,
        ledger: Arc<SteeringLedger>,
    ) -> Self {
        Self {
            analysis,
            inference,
            store,
            ledger,
        }
    }

    /// Run the pipeline against one variant.
    pub async fn run(
        &self,
        session_id: &str,
        variant_id: Option<&str>,
        query: &str,
        context: &[ChatMessage],
    ) -> AutoSteerRun {
        let variant = self.store.get_or_create(session_id, variant_id);
        let spec = ModelSpec::new(variant.base_model.clone(), variant.confirmed_edit_list());
        let current_edits = self.labeled_edits(&variant.confirmed_edit_list()).await;

        // Stage 1: intent/persona synthesis.
        let IntentSynthesis { persona, keywords } =
            self.synthesize_intent(query, context, &current_edits).await;
        if keywords.is_empty() {
            tracing::info!(session_id, "auto-steer: no keywords synthesized");
            return AutoSteerRun::unsuccessful(keywords, persona);
        }

        // Stage 2: keyword-length guard.
        let keywords = truncate_keywords(keywords, QUERY_MAX_LEN);
        if keywords.is_empty() {
            return AutoSteerRun::unsuccessful(keywords, persona);
        }

        // Stage 3: one feature search over the joined keywords.
        let joined = keywords.join(" ");
        let candidates = match self.inference.search(&spec, &joined, SEARCH_TOP_K).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "auto-steer: feature search failed");
                return AutoSteerRun::unsuccessful(keywords, persona);
            }
        };
        if candidates.is_empty() {
            tracing::info!(session_id, query = joined, "auto-steer: search returned nothing");
            return AutoSteerRun::unsuccessful(keywords, persona);
        }

        // Stage 4: feature selection.
        let selections = self
            .select_features(query, &candidates, &current_edits)
            .await;
        if selections.is_empty() {
            tracing::info!(session_id, "auto-steer: no usable selections");
            return AutoSteerRun::unsuccessful(keywords, persona);
        }

        // Stage 5: propose each surviving edit; individual failures are
        // skipped, the run reports whatever stuck.
        let mut applied = Vec::new();
        for selection in selections {
            let Some(feature) = resolve_target(&selection, &candidates) else {
                tracing::warn!(target = selection.target, "auto-steer: unresolvable selection");
                continue;
            };
            match self
                .ledger
                .propose(session_id, variant_id, &feature.id, selection.value)
            {
                Ok(value) => applied.push(FeatureEdit::new(feature.id.clone(), value)),
                Err(e) => {
                    tracing::warn!(feature_id = feature.id, error = %e, "auto-steer: propose failed");
                }
            }
        }

        let success = !applied.is_empty();
        tracing::info!(session_id, success, applied = applied.len(), "auto-steer complete");
        AutoSteerRun {
            success,
            keywords,
            persona,
            applied,
        }
    }

    /// Structured call first, then one free-text retry with a JSON
    /// suffix; anything worse degrades to empty keywords.
    async fn synthesize_intent(
        &self,
        query: &str,
        context: &[ChatMessage],
        current_edits: &[(String, f64)],
    ) -> IntentSynthesis {
        let prompt = analysis::intent_prompt(query, context, current_edits);

        match self
            .analysis
            .invoke(INTENT_SYSTEM, &prompt, Some(analysis::intent_function()))
            .await
        {
            Ok(reply) => {
                let intent = analysis::parse_intent(&reply);
                if !intent.keywords.is_empty() {
                    return intent;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "intent synthesis: structured call failed");
            }
        }

        let fallback_prompt = format!("{prompt}{INTENT_JSON_SUFFIX}");
        match self
            .analysis
            .invoke(INTENT_SYSTEM, &fallback_prompt, None)
            .await
        {
            Ok(reply) => analysis::parse_intent(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "intent synthesis: fallback call failed");
                IntentSynthesis::default()
            }
        }
    }

    /// Same structured-then-fallback strategy for the selection stage.
    async fn select_features(
        &self,
        query: &str,
        candidates: &[Feature],
        current_edits: &[(String, f64)],
    ) -> Vec<Selection> {
        let prompt = analysis::selection_prompt(query, candidates, current_edits);

        match self
            .analysis
            .invoke(
                SELECTION_SYSTEM,
                &prompt,
                Some(analysis::selection_function()),
            )
            .await
        {
            Ok(reply) => {
                let selections = analysis::parse_selections(&reply);
                if !selections.is_empty() {
                    return selections;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "feature selection: structured call failed");
            }
        }

        let fallback_prompt = format!("{prompt}{SELECTION_JSON_SUFFIX}");
        match self
            .analysis
            .invoke(SELECTION_SYSTEM, &fallback_prompt, None)
            .await
        {
            Ok(reply) => analysis::parse_selections(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "feature selection: fallback call failed");
                Vec::new()
            }
        }
    }

    /// Pair confirmed edits with labels for prompt context. Lookup
    /// failures fall back to the raw feature id.
    async fn labeled_edits(&self, edits: &[FeatureEdit]) -> Vec<(String, f64)> {
        if edits.is_empty() {
            return Vec::new();
        }
        let ids: Vec<String> = edits.iter().map(|e| e.feature_id.clone()).collect();
        let features = self
            .inference
            .features_by_id(&ids)
            .await
            .unwrap_or_default();

        edits
            .iter()
            .map(|edit| {
                let label = features
                    .iter()
                    .find(|f| f.id == edit.feature_id)
                    .map(|f| f.label.clone())
                    .unwrap_or_else(|| edit.feature_id.clone());
                (label, edit.value)
            })
            .collect()
    }
}

/// Resolve a selection target: feature id equality first, then the label
/// matching chain.
fn resolve_target<'a>(selection: &Selection, candidates: &'a [Feature]) -> Option<&'a Feature> {
    candidates
        .iter()
        .find(|f| f.id == selection.target)
        .or_else(|| match_label(&selection.target, candidates))
}

/// Shrink a keyword list until its space-joined form fits `max_len`
/// characters.
///
/// Drops trailing keywords first, then character-truncates the last
/// survivor on a char boundary. The result is an ordered,
/// prefix-consistent reduction of the input. Lengths are measured in
/// characters, not bytes, to match the search service's query limit.
pub fn truncate_keywords(mut keywords: Vec<String>, max_len: usize) -> Vec<String> {
    fn char_len(s: &str) -> usize {
        s.chars().count()
    }
    fn joined_len(keywords: &[String]) -> usize {
        keywords
            .iter()
            .map(|k| char_len(k) + 1)
            .sum::<usize>()
            .saturating_sub(1)
    }

    if joined_len(&keywords) <= max_len {
        return keywords;
    }

    while keywords.len() > 1 && joined_len(&keywords) > max_len {
        keywords.pop();
    }

    let used: usize = keywords[..keywords.len() - 1]
        .iter()
        .map(|k| char_len(k) + 1)
        .sum();
    let remaining = max_len.saturating_sub(used);
    if remaining == 0 {
        keywords.pop();
    } else if let Some(last) = keywords.last_mut() {
        if let Some((end, _)) = last.char_indices().nth(remaining) {
            last.truncate(end);
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAnalysis, MockInference};

    fn harness(
        analysis: MockAnalysis,
        inference: MockInference,
    ) -> (AutoSteerPipeline, Arc<VariantStore>, Arc<SteeringLedger>) {
        let store = Arc::new(VariantStore::new("test-model"));
        let ledger = Arc::new(SteeringLedger::new(store.clone()));
        let pipeline = AutoSteerPipeline::new(
            Arc::new(analysis),
            Arc::new(inference),
            store.clone(),
            ledger.clone(),
        );
        (pipeline, store, ledger)
    }

    #[tokio::test]
    async fn test_happy_path_proposes_without_commit() {
        let analysis = MockAnalysis::default()
            .with_function_call(serde_json::json!({
                "persona": {"role": "comedian", "style": "dry", "approach": "playful"},
                "keywords": ["humor", "wit"]
            }))
            .with_function_call(serde_json::json!({
                "selections": [{"label": "dry humor", "value": 0.4}]
            }));
        let inference = MockInference::default()
            .with_search_results(vec![Feature::new("f1", "dry humor")]);
        let (pipeline, store, ledger) = harness(analysis, inference);

        let run = pipeline.run("s1", None, "be funnier", &[]).await;
        assert!(run.success);
        assert_eq!(run.keywords, vec!["humor", "wit"]);
        assert_eq!(run.persona.unwrap().role, "comedian");
        assert_eq!(run.applied, vec![FeatureEdit::new("f1", 0.4)]);

        // Proposed, not committed.
        assert_eq!(ledger.effective("s1", None)["f1"], 0.4);
        let snap = store.serialize("s1", None).unwrap();
        assert!(snap.edits.is_empty());
        assert_eq!(snap.pending_edits.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_keywords_short_circuits_without_mutation() {
        let analysis = MockAnalysis::default().with_error().with_error();
        let (pipeline, store, _ledger) = harness(analysis, MockInference::default());

        let run = pipeline.run("s1", None, "be funnier", &[]).await;
        assert!(!run.success);
        assert!(run.keywords.is_empty());
        assert!(run.applied.is_empty());

        let snap = store.serialize("s1", None).unwrap();
        assert!(snap.edits.is_empty());
        assert!(snap.pending_edits.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_call_recovers_keywords() {
        let analysis = MockAnalysis::default().with_error().with_reply(
            crate::analysis::AnalysisReply::FreeText(
                "Sure! {\"keywords\": [\"humor\"]}".into(),
            ),
        );
        // Selection stage then exhausts the mock and fails both calls.
        let inference = MockInference::default()
            .with_search_results(vec![Feature::new("f1", "humor")]);
        let (pipeline, _store, _ledger) = harness(analysis, inference);

        let run = pipeline.run("s1", None, "be funnier", &[]).await;
        assert!(!run.success);
        assert_eq!(run.keywords, vec!["humor"]);
    }

    #[tokio::test]
    async fn test_search_failure_degrades() {
        let analysis = MockAnalysis::default().with_function_call(serde_json::json!({
            "keywords": ["humor"]
        }));
        let mut inference = MockInference::default();
        inference.fail_search = true;
        let (pipeline, _store, _ledger) = harness(analysis, inference);

        let run = pipeline.run("s1", None, "be funnier", &[]).await;
        assert!(!run.success);
        assert_eq!(run.keywords, vec!["humor"]);
        assert!(run.applied.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_selection_skipped() {
        let analysis = MockAnalysis::default()
            .with_function_call(serde_json::json!({"keywords": ["humor"]}))
            .with_function_call(serde_json::json!({
                "selections": [
                    {"label": "pirate speak", "value": 0.4},
                    {"label": "dry humor", "value": 0.2}
                ]
            }));
        let inference = MockInference::default()
            .with_search_results(vec![Feature::new("f1", "dry humor")]);
        let (pipeline, _store, _ledger) = harness(analysis, inference);

        let run = pipeline.run("s1", None, "be funnier", &[]).await;
        assert!(run.success);
        assert_eq!(run.applied, vec![FeatureEdit::new("f1", 0.2)]);
    }

    #[tokio::test]
    async fn test_search_uses_joined_keywords_top_10() {
        let analysis = MockAnalysis::default()
            .with_function_call(serde_json::json!({"keywords": ["humor", "wit"]}))
            .with_error()
            .with_error();
        let inference = MockInference::default()
            .with_search_results(vec![Feature::new("f1", "humor")]);
        let inference = Arc::new(inference);

        let store = Arc::new(VariantStore::new("test-model"));
        let ledger = Arc::new(SteeringLedger::new(store.clone()));
        let pipeline = AutoSteerPipeline::new(
            Arc::new(analysis),
            inference.clone(),
            store,
            ledger,
        );
        let _ = pipeline.run("s1", None, "be funnier", &[]).await;

        let searches = inference.searches.lock().unwrap();
        assert_eq!(searches.as_slice(), &[("humor wit".to_string(), SEARCH_TOP_K)]);
    }

    #[test]
    fn test_truncate_keywords_within_limit_untouched() {
        let keywords = vec!["a".to_string(), "b".to_string()];
        assert_eq!(truncate_keywords(keywords.clone(), 100), keywords);
    }

    #[test]
    fn test_truncate_keywords_drops_then_cuts() {
        let keywords: Vec<String> = vec!["x".repeat(60), "y".repeat(60), "z".repeat(60)];
        let truncated = truncate_keywords(keywords.clone(), 100);
        assert!(truncated.join(" ").len() <= 100);
        // Prefix-consistent: survivors are a prefix of the input.
        assert_eq!(truncated, vec![keywords[0].clone()]);
    }

    #[test]
    fn test_truncate_single_long_keyword() {
        let keywords = vec!["k".repeat(150)];
        let truncated = truncate_keywords(keywords, 100);
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].len(), 100);
    }

    #[test]
    fn test_truncate_multibyte_keyword_counts_chars() {
        // 120 three-byte chars; the cut lands on a char boundary and the
        // limit is measured in characters, not bytes.
        let keywords = vec!["語".repeat(120)];
        let truncated = truncate_keywords(keywords, 100);
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].chars().count(), 100);
        assert!(truncated[0].chars().all(|c| c == '語'));
    }

    #[test]
    fn test_truncate_multibyte_joined_length_in_chars() {
        let keywords = vec!["é".repeat(60), "ü".repeat(60)];
        let truncated = truncate_keywords(keywords.clone(), 100);
        // 121 chars joined, so the trailing keyword drops whole.
        assert_eq!(truncated, vec![keywords[0].clone()]);
        // 99 chars joined fits untouched despite being >100 bytes.
        let keywords = vec!["é".repeat(49), "ü".repeat(49)];
        assert_eq!(truncate_keywords(keywords.clone(), 100), keywords);
    }
}

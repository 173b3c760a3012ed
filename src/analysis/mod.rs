//! Boundary to the external analysis capability.
//!
//! The analysis capability is a language model asked to reason about
//! personas, search keywords, and feature selection. It answers in one of
//! two shapes: a structured function-call payload, or free text that is
//! expected to contain JSON. [`AnalysisReply`] models both explicitly and
//! the extractors here run a parse-then-fallback chain over them,
//! degrading to an empty result on malformed output rather than raising.

mod http;

pub use http::HttpAnalysisClient;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::features::Feature;
use crate::inference::ChatMessage;

/// Maximum number of search keywords kept from a synthesis reply.
pub const MAX_KEYWORDS: usize = 5;
/// Maximum number of feature selections kept from a selection reply.
pub const MAX_SELECTIONS: usize = 2;
/// Auto-steer strength bound (tighter than the manual ±1.0).
pub const AUTO_STRENGTH_MAX: f64 = 0.6;
/// Auto-steer strengths snap to this increment.
pub const AUTO_STRENGTH_STEP: f64 = 0.2;

/// A reply from the analysis capability.
#[derive(Debug, Clone)]
pub enum AnalysisReply {
    /// Structured function-call arguments.
    FunctionCall(Value),
    /// Free text, hopefully containing JSON.
    FreeText(String),
}

/// Role/style/approach persona synthesized for a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub role: String,
    pub style: String,
    pub approach: String,
}

/// Output of the intent/persona synthesis stage.
#[derive(Debug, Clone, Default)]
pub struct IntentSynthesis {
    pub persona: Option<Persona>,
    pub keywords: Vec<String>,
}

/// One feature pick from the selection stage. `target` is a feature id
/// when the capability echoed one, otherwise a label to resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub target: String,
    pub value: f64,
}

/// Client contract for the analysis capability.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Send one prompt. When `function` is set, the capability is asked
    /// to answer through that function schema; it may still answer with
    /// free text.
    async fn invoke(
        &self,
        system: &str,
        prompt: &str,
        function: Option<Value>,
    ) -> Result<AnalysisReply>;
}

// ---------------------------------------------------------------------------
// Function schemas
// ---------------------------------------------------------------------------

/// Schema for the intent/persona synthesis call.
pub fn intent_function() -> Value {
    serde_json::json!({
        "name": "synthesize_intent",
        "description": "Design an assistant persona and search keywords for feature discovery",
        "parameters": {
            "type": "object",
            "properties": {
                "persona": {
                    "type": "object",
                    "properties": {
                        "role": { "type": "string" },
                        "style": { "type": "string" },
                        "approach": { "type": "string" }
                    },
                    "required": ["role", "style", "approach"]
                },
                "keywords": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "maxItems": MAX_KEYWORDS,
                    "description": "Keywords for searching steerable model features"
                }
            },
            "required": ["keywords"]
        }
    })
}

/// Schema for the feature selection call.
pub fn selection_function() -> Value {
    serde_json::json!({
        "name": "select_features",
        "description": "Select model features to modify for behavior steering",
        "parameters": {
            "type": "object",
            "properties": {
                "selections": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "feature_id": { "type": "string" },
                            "value": {
                                "type": "number",
                                "minimum": -AUTO_STRENGTH_MAX,
                                "maximum": AUTO_STRENGTH_MAX
                            }
                        },
                        "required": ["feature_id", "value"]
                    },
                    "minItems": 1,
                    "maxItems": MAX_SELECTIONS
                }
            },
            "required": ["selections"]
        }
    })
}

// ---------------------------------------------------------------------------
// Prompt builders
// ---------------------------------------------------------------------------

pub const INTENT_SYSTEM: &str =
    "You are an expert at analyzing user intent and designing AI assistant personas.";

pub const SELECTION_SYSTEM: &str =
    "You are an expert at selecting and modifying AI model features for behavior steering.";

/// Build the three-step intent/persona/keyword prompt. Carries up to 3
/// prior turns and a summary of current confirmed edits.
pub fn intent_prompt(
    query: &str,
    context: &[ChatMessage],
    current_edits: &[(String, f64)],
) -> String {
    let mut context_info = String::new();
    if !context.is_empty() {
        context_info.push_str("Recent conversation:\n");
        let start = context.len().saturating_sub(3);
        for (i, msg) in context[start..].iter().enumerate() {
            context_info.push_str(&format!("{}. {}: {}\n", i + 1, msg.role, msg.content));
        }
        context_info.push('\n');
    }
    if !current_edits.is_empty() {
        context_info.push_str("Current feature modifications:\n");
        for (label, value) in current_edits {
            context_info.push_str(&format!("- {label}: {value}\n"));
        }
        context_info.push('\n');
    }

    format!(
        "{context_info}User Query: \"{query}\"\n\n\
         Please follow this three-step process:\n\n\
         **Step 1: Intent Analysis**\n\
         - What is the user trying to achieve?\n\
         - What level of expertise is required?\n\
         - What type of response would be most helpful?\n\n\
         **Step 2: Persona Design**\n\
         Based on the intent analysis, design an AI assistant persona that would be optimal for responding.\n\
         Consider:\n\
         - What role should the assistant take?\n\
         - What communication style would be most effective?\n\
         - What problem-solving approach would work best?\n\n\
         **Step 3: Keyword Generation**\n\
         Based on the designed persona, generate at most {MAX_KEYWORDS} keywords that would help find \
         AI model features to steer the assistant's behavior in that direction."
    )
}

/// Build the feature-selection prompt over one search result set.
pub fn selection_prompt(
    query: &str,
    candidates: &[Feature],
    current_edits: &[(String, f64)],
) -> String {
    let mut features_info = String::new();
    for (i, feature) in candidates.iter().enumerate() {
        features_info.push_str(&format!("{}. {} (id: {})\n", i + 1, feature.label, feature.id));
        if let Some(activation) = feature.activation {
            features_info.push_str(&format!("   Current activation: {activation}\n"));
        }
    }

    let mut current_info = String::new();
    if !current_edits.is_empty() {
        current_info.push_str("Current modifications:\n");
        for (label, value) in current_edits {
            current_info.push_str(&format!("- {label}: {value}\n"));
        }
        current_info.push('\n');
    }

    format!(
        "{current_info}User Query: \"{query}\"\n\n\
         Available features from search:\n{features_info}\n\
         Please select 1-{MAX_SELECTIONS} features that would best help achieve the user's intent. \
         For each selected feature, suggest a modification value between -{AUTO_STRENGTH_MAX} and \
         {AUTO_STRENGTH_MAX} in increments of {AUTO_STRENGTH_STEP}:\n\
         - Positive values increase the feature's influence\n\
         - Negative values decrease the feature's influence\n\n\
         Consider:\n\
         - Which features are most relevant to the user's request?\n\
         - What modification strength would be appropriate?\n\
         - Don't over-modify (avoid too many features or extreme values)"
    )
}

/// Suffix appended on the free-text fallback attempt of the intent call.
pub const INTENT_JSON_SUFFIX: &str = "\n\nRespond with JSON only: \
    {\"persona\": {\"role\": \"...\", \"style\": \"...\", \"approach\": \"...\"}, \
    \"keywords\": [\"word1\", \"word2\", \"word3\"]}";

/// Suffix appended on the free-text fallback attempt of the selection call.
pub const SELECTION_JSON_SUFFIX: &str = "\n\nRespond with JSON only: \
    {\"selections\": [{\"label\": \"explanation style\", \"value\": 0.4}]}";

// ---------------------------------------------------------------------------
// Parse-then-fallback extraction
// ---------------------------------------------------------------------------

static KEYWORDS_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{[^{}]*"keywords"[^{}]*\}"#).expect("static regex"));
static SELECTIONS_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{[^{}]*"selections"[^{}]*\}"#).expect("static regex"));

/// Run the parse chain: structured args as-is, then whole-body JSON, then
/// the first `{...}` span, then a regex rescue around `key`.
fn reply_json(reply: &AnalysisReply, key_regex: &Regex) -> Option<Value> {
    match reply {
        AnalysisReply::FunctionCall(args) => Some(args.clone()),
        AnalysisReply::FreeText(text) => {
            let trimmed = text.trim();
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return Some(value);
            }
            // Widest brace span first.
            if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
                if start < end {
                    if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                        return Some(value);
                    }
                }
            }
            key_regex
                .find(trimmed)
                .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        }
    }
}

/// Extract persona + keywords from a synthesis reply.
///
/// Keywords are trimmed, lowercased, and capped at [`MAX_KEYWORDS`];
/// malformed output yields an empty result.
pub fn parse_intent(reply: &AnalysisReply) -> IntentSynthesis {
    let Some(value) = reply_json(reply, &KEYWORDS_OBJECT) else {
        return IntentSynthesis::default();
    };

    let persona = value
        .get("persona")
        .and_then(|p| serde_json::from_value::<Persona>(p.clone()).ok());

    let keywords = value
        .get("keywords")
        .and_then(|k| k.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|kw| kw.as_str())
                .map(|kw| kw.trim().to_lowercase())
                .filter(|kw| !kw.is_empty())
                .take(MAX_KEYWORDS)
                .collect()
        })
        .unwrap_or_default();

    IntentSynthesis { persona, keywords }
}

/// Snap a strength to the nearest auto-steer increment.
pub fn snap_strength(value: f64) -> f64 {
    (value / AUTO_STRENGTH_STEP).round() * AUTO_STRENGTH_STEP
}

/// Extract feature selections from a selection reply.
///
/// Values outside ±[`AUTO_STRENGTH_MAX`] are dropped, survivors snap to
/// [`AUTO_STRENGTH_STEP`] increments, and at most [`MAX_SELECTIONS`] are
/// kept. Accepts both the structured shape (`feature_id`) and the
/// free-text shape (`label`).
pub fn parse_selections(reply: &AnalysisReply) -> Vec<Selection> {
    let Some(value) = reply_json(reply, &SELECTIONS_OBJECT) else {
        return Vec::new();
    };
    let Some(items) = value.get("selections").and_then(|s| s.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let target = item
                .get("feature_id")
                .or_else(|| item.get("feature_uuid"))
                .or_else(|| item.get("label"))
                .and_then(|t| t.as_str())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())?;
            let value = item
                .get("value")
                .or_else(|| item.get("modification_value"))
                .and_then(|v| v.as_f64())?;
            if value.abs() > AUTO_STRENGTH_MAX + f64::EPSILON {
                return None;
            }
            Some(Selection {
                target,
                value: snap_strength(value),
            })
        })
        .take(MAX_SELECTIONS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intent_function_call() {
        let reply = AnalysisReply::FunctionCall(serde_json::json!({
            "persona": {"role": "coach", "style": "warm", "approach": "socratic"},
            "keywords": ["Formal Writing", "  depth ", "", "a", "b", "c", "d"]
        }));
        let intent = parse_intent(&reply);
        assert_eq!(intent.persona.as_ref().unwrap().role, "coach");
        assert_eq!(
            intent.keywords,
            vec!["formal writing", "depth", "a", "b", "c"]
        );
    }

    #[test]
    fn test_parse_intent_free_text_json() {
        let reply = AnalysisReply::FreeText(
            "Here you go:\n{\"keywords\": [\"humor\", \"wit\"]}\nHope that helps!".into(),
        );
        let intent = parse_intent(&reply);
        assert_eq!(intent.keywords, vec!["humor", "wit"]);
        assert!(intent.persona.is_none());
    }

    #[test]
    fn test_parse_intent_malformed_degrades_to_empty() {
        let reply = AnalysisReply::FreeText("I cannot answer in JSON, sorry.".into());
        let intent = parse_intent(&reply);
        assert!(intent.keywords.is_empty());
        assert!(intent.persona.is_none());
    }

    #[test]
    fn test_parse_selections_structured() {
        let reply = AnalysisReply::FunctionCall(serde_json::json!({
            "selections": [
                {"feature_id": "f1", "value": 0.41},
                {"feature_id": "f2", "value": -0.6},
                {"feature_id": "f3", "value": 0.2}
            ]
        }));
        let selections = parse_selections(&reply);
        assert_eq!(selections.len(), MAX_SELECTIONS);
        assert_eq!(selections[0].target, "f1");
        assert!((selections[0].value - 0.4).abs() < 1e-9);
        assert!((selections[1].value - -0.6).abs() < 1e-9);
    }

    #[test]
    fn test_parse_selections_drops_out_of_range() {
        let reply = AnalysisReply::FunctionCall(serde_json::json!({
            "selections": [
                {"feature_id": "f1", "value": 0.9},
                {"label": "humor", "value": 0.2}
            ]
        }));
        let selections = parse_selections(&reply);
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].target, "humor");
    }

    #[test]
    fn test_snap_strength() {
        assert!((snap_strength(0.13) - 0.2).abs() < 1e-9);
        // round() goes away from zero on ties
        assert!((snap_strength(-0.5) - -0.6).abs() < 1e-9);
        assert_eq!(snap_strength(0.0), 0.0);
    }

    #[test]
    fn test_intent_prompt_trims_context_to_three_turns() {
        let turns: Vec<ChatMessage> = (0..5)
            .map(|i| ChatMessage::user(format!("turn {i}")))
            .collect();
        let prompt = intent_prompt("help me", &turns, &[]);
        assert!(!prompt.contains("turn 0"));
        assert!(!prompt.contains("turn 1"));
        assert!(prompt.contains("turn 2"));
        assert!(prompt.contains("turn 4"));
    }

    #[test]
    fn test_selection_prompt_lists_candidates() {
        let candidates = vec![Feature::new("f1", "dry humor")];
        let prompt = selection_prompt("be funnier", &candidates, &[("humor".into(), 0.2)]);
        assert!(prompt.contains("dry humor"));
        assert!(prompt.contains("id: f1"));
        assert!(prompt.contains("humor: 0.2"));
    }
}

//! Variant model and snapshots.
//!
//! A variant ("configuration") is a base model reference plus two maps of
//! feature-strength edits: confirmed edits are used by default
//! generations, pending edits are proposed-but-not-yet-default. The
//! effective view overlays pending on top of confirmed.

mod ledger;
mod store;

pub use ledger::SteeringLedger;
pub use store::VariantStore;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::features::FeatureEdit;

/// Id of the per-session default variant, materialized on first access.
pub const DEFAULT_VARIANT_ID: &str = "default";

/// A model configuration: base model plus feature-strength edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub base_model: String,
    /// Edits used by default generations.
    pub confirmed_edits: HashMap<String, f64>,
    /// Proposed edits awaiting commit or reject.
    pub pending_edits: HashMap<String, f64>,
}

impl Variant {
    pub fn new(id: impl Into<String>, base_model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_model: base_model.into(),
            confirmed_edits: HashMap::new(),
            pending_edits: HashMap::new(),
        }
    }

    /// Confirmed edits overlaid by pending edits where present.
    pub fn effective_edits(&self) -> HashMap<String, f64> {
        let mut edits = self.confirmed_edits.clone();
        for (feature_id, value) in &self.pending_edits {
            edits.insert(feature_id.clone(), *value);
        }
        edits
    }

    /// Confirmed edits as a sorted list, for generation and display.
    pub fn confirmed_edit_list(&self) -> Vec<FeatureEdit> {
        sorted_edits(&self.confirmed_edits)
    }

    /// Effective edits as a sorted list.
    pub fn effective_edit_list(&self) -> Vec<FeatureEdit> {
        sorted_edits(&self.effective_edits())
    }
}

/// Serialized view of a variant: base model plus edit lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub id: String,
    pub base_model: String,
    /// Confirmed edits.
    pub edits: Vec<FeatureEdit>,
    /// Pending (uncommitted) edits.
    pub pending_edits: Vec<FeatureEdit>,
}

impl VariantSnapshot {
    pub fn of(variant: &Variant) -> Self {
        Self {
            id: variant.id.clone(),
            base_model: variant.base_model.clone(),
            edits: variant.confirmed_edit_list(),
            pending_edits: sorted_edits(&variant.pending_edits),
        }
    }
}

fn sorted_edits(map: &HashMap<String, f64>) -> Vec<FeatureEdit> {
    let mut edits: Vec<FeatureEdit> = map
        .iter()
        .map(|(id, value)| FeatureEdit::new(id.clone(), *value))
        .collect();
    edits.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
    edits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_overlay() {
        let mut v = Variant::new("default", "test-model");
        v.confirmed_edits.insert("humor".into(), 0.5);
        v.confirmed_edits.insert("formal".into(), -0.2);
        v.pending_edits.insert("humor".into(), 0.1);

        let effective = v.effective_edits();
        assert_eq!(effective["humor"], 0.1);
        assert_eq!(effective["formal"], -0.2);
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut v = Variant::new("default", "test-model");
        v.confirmed_edits.insert("zeta".into(), 0.4);
        v.confirmed_edits.insert("alpha".into(), 0.2);

        let snap = VariantSnapshot::of(&v);
        assert_eq!(snap.edits[0].feature_id, "alpha");
        assert_eq!(snap.edits[1].feature_id, "zeta");
        assert!(snap.pending_edits.is_empty());
    }
}

//! Feature wire types.
//!
//! A feature is a named, steerable direction in the model's internal
//! representation: an opaque stable id plus a human-readable label. The
//! label is not unique — the id is the only safe key.

use serde::{Deserialize, Serialize};

/// A steerable feature exposed by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Opaque, stable identifier.
    pub id: String,
    /// Human-readable label (not unique).
    pub label: String,
    /// Last known activation, when the feature came from an inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<f64>,
}

impl Feature {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            activation: None,
        }
    }
}

/// An activated feature from conversation inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureActivation {
    pub feature: Feature,
    pub activation: f64,
}

/// A (feature, strength) entry in a variant's edit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEdit {
    pub feature_id: String,
    pub value: f64,
}

impl FeatureEdit {
    pub fn new(feature_id: impl Into<String>, value: f64) -> Self {
        Self {
            feature_id: feature_id.into(),
            value,
        }
    }
}

//! Two-phase steering ledger.
//!
//! Edits accumulate as pending proposals and become confirmed only on
//! commit. Committing a zero deletes any confirmed entry for that
//! feature, so confirmed edits are never left at strength 0. Reject
//! drops pending proposals and leaves confirmed edits untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SteerError};
use crate::variant::VariantStore;

/// Steering strength bounds for manual proposals.
pub const STRENGTH_MIN: f64 = -1.0;
pub const STRENGTH_MAX: f64 = 1.0;

/// Transactional propose/commit/reject over a variant's edit maps.
///
/// The only component allowed to mutate edit maps. Last write wins on
/// concurrent proposals for the same (variant, feature); the store's
/// shard lock keeps each individual operation atomic.
pub struct SteeringLedger {
    store: Arc<VariantStore>,
}

impl SteeringLedger {
    pub fn new(store: Arc<VariantStore>) -> Self {
        Self { store }
    }

    /// Record a pending edit, overwriting any previous proposal for the
    /// same feature. Returns the accepted value.
    pub fn propose(
        &self,
        session_id: &str,
        variant_id: Option<&str>,
        feature_id: &str,
        value: f64,
    ) -> Result<f64> {
        if !(STRENGTH_MIN..=STRENGTH_MAX).contains(&value) || !value.is_finite() {
            return Err(SteerError::validation(format!(
                "steering value {value} must be between {STRENGTH_MIN} and {STRENGTH_MAX}"
            )));
        }
        if feature_id.is_empty() {
            return Err(SteerError::validation("feature_id must not be empty"));
        }

        self.store.with_variant_mut(session_id, variant_id, |v| {
            v.pending_edits.insert(feature_id.to_string(), value);
        });
        tracing::debug!(session_id, feature_id, value, "proposed pending edit");
        Ok(value)
    }

    /// Promote all pending edits to confirmed and clear pending.
    ///
    /// A zero-valued pending edit deletes the confirmed entry if one
    /// exists and is otherwise skipped. An empty commit is a success.
    pub fn commit(&self, session_id: &str, variant_id: Option<&str>) -> Result<()> {
        let committed = self.store.with_variant_mut(session_id, variant_id, |v| {
            let pending = std::mem::take(&mut v.pending_edits);
            let count = pending.len();
            for (feature_id, value) in pending {
                if value == 0.0 {
                    v.confirmed_edits.remove(&feature_id);
                } else {
                    v.confirmed_edits.insert(feature_id, value);
                }
            }
            count
        });
        tracing::info!(session_id, committed, "committed pending edits");
        Ok(())
    }

    /// Drop all pending edits. Confirmed edits are untouched; rejecting
    /// with nothing pending is a success.
    pub fn reject(&self, session_id: &str, variant_id: Option<&str>) -> Result<()> {
        let rejected = self.store.with_variant_mut(session_id, variant_id, |v| {
            let count = v.pending_edits.len();
            v.pending_edits.clear();
            count
        });
        tracing::info!(session_id, rejected, "rejected pending edits");
        Ok(())
    }

    /// Confirmed edits overlaid by pending, for display.
    pub fn effective(&self, session_id: &str, variant_id: Option<&str>) -> HashMap<String, f64> {
        self.store
            .get_or_create(session_id, variant_id)
            .effective_edits()
    }
}

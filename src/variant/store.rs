//! In-memory variant store.
//!
//! Sessions and variants live for the process lifetime; nothing is ever
//! deleted or persisted. The map is sharded by session via `DashMap`, so
//! concurrent requests against different sessions never contend and two
//! writers on the same session serialize on the shard lock.

use std::collections::HashMap;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Result, SteerError};
use crate::variant::{Variant, VariantSnapshot, DEFAULT_VARIANT_ID};

/// Owns every (session, variant-id) configuration.
///
/// Creation is lazy and lenient: unknown sessions and unseen variant ids
/// are materialized on first access rather than rejected. Only
/// [`super::SteeringLedger`] mutates a variant's edit maps.
pub struct VariantStore {
    default_base_model: String,
    sessions: DashMap<String, HashMap<String, Variant>>,
}

impl VariantStore {
    pub fn new(default_base_model: impl Into<String>) -> Self {
        Self {
            default_base_model: default_base_model.into(),
            sessions: DashMap::new(),
        }
    }

    /// Get a variant, creating it (and the session default) if absent.
    ///
    /// With no `variant_id` this returns the session's default variant.
    /// An unseen non-default id silently becomes a fresh variant sharing
    /// the default's base model — availability over strict validation.
    pub fn get_or_create(&self, session_id: &str, variant_id: Option<&str>) -> Variant {
        let id = variant_id.unwrap_or(DEFAULT_VARIANT_ID);
        let mut session = self.sessions.entry(session_id.to_string()).or_default();

        let base_model = session
            .entry(DEFAULT_VARIANT_ID.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "creating default variant");
                Variant::new(DEFAULT_VARIANT_ID, self.default_base_model.clone())
            })
            .base_model
            .clone();

        session
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, variant_id = id, "creating variant");
                Variant::new(id, base_model)
            })
            .clone()
    }

    /// Deep-copy a variant's confirmed edits into a new variant.
    ///
    /// Pending edits do not travel; the clone starts with a clean slate.
    pub fn clone_variant(&self, session_id: &str, source_id: &str) -> Result<Variant> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SteerError::not_found("session", session_id))?;

        let source = session
            .get(source_id)
            .ok_or_else(|| SteerError::not_found("variant", source_id))?;

        let mut clone = Variant::new(Uuid::new_v4().to_string(), source.base_model.clone());
        clone.confirmed_edits = source.confirmed_edits.clone();

        tracing::info!(
            session_id,
            source_id,
            clone_id = %clone.id,
            edits = clone.confirmed_edits.len(),
            "cloned variant"
        );
        session.insert(clone.id.clone(), clone.clone());
        Ok(clone)
    }

    /// Serialize a variant to base model + edit lists.
    pub fn serialize(&self, session_id: &str, variant_id: Option<&str>) -> Result<VariantSnapshot> {
        let id = variant_id.unwrap_or(DEFAULT_VARIANT_ID);
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SteerError::not_found("session", session_id))?;

        let variant = session
            .get(id)
            .ok_or_else(|| SteerError::not_found("variant", id))?;
        Ok(VariantSnapshot::of(variant))
    }

    /// Mutate a variant under the session shard lock, creating it first
    /// if needed. Ledger-only entry point.
    pub(crate) fn with_variant_mut<R>(
        &self,
        session_id: &str,
        variant_id: Option<&str>,
        f: impl FnOnce(&mut Variant) -> R,
    ) -> R {
        // Materialize first so the closure always has a target.
        self.get_or_create(session_id, variant_id);

        let id = variant_id.unwrap_or(DEFAULT_VARIANT_ID);
        let mut session = self
            .sessions
            .get_mut(session_id)
            .expect("session materialized above");
        let variant = session.get_mut(id).expect("variant materialized above");
        f(variant)
    }
}

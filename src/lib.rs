//! # steerage
//!
//! Variant steering and auto-steer orchestration for feature-steerable
//! language models.
//!
//! A *variant* is a base model plus a set of named feature-strength
//! edits, scoped to an opaque session. Edits move through a two-phase
//! ledger (pending, then confirmed), so a client can preview a steered
//! generation before committing. The auto-steer pipeline derives edits
//! from a free-text request via an external analysis model, and the
//! completion orchestrator runs baseline/steered generations side by
//! side, batched or streamed.
//!
//! # Components
//!
//! - [`variant::VariantStore`] — per-session variant configurations
//! - [`variant::SteeringLedger`] — propose/commit/reject over edits
//! - [`resolver::FeatureResolver`] — query/label/id to canonical features
//! - [`autosteer::AutoSteerPipeline`] — five-stage edit derivation
//! - [`completion::CompletionOrchestrator`] — baseline vs steered runs
//! - [`server`] — the axum HTTP surface

pub mod analysis;
pub mod autosteer;
pub mod completion;
pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod resolver;
pub mod server;
pub mod variant;

#[cfg(test)]
pub(crate) mod testing;

pub use autosteer::{AutoSteerPipeline, AutoSteerRun};
pub use completion::{CompletionOrchestrator, CompletionResponse, ComparisonResult};
pub use error::{Result, SteerError};
pub use features::{Feature, FeatureActivation, FeatureEdit};
pub use resolver::FeatureResolver;
pub use variant::{SteeringLedger, Variant, VariantSnapshot, VariantStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

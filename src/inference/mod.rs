//! Boundary to the feature-steerable inference service.
//!
//! The service provides semantic feature search, direct feature lookup,
//! activation inspection, and chat generation against a model
//! configuration (base model + feature-strength edits). Everything the
//! rest of the crate needs goes through [`InferenceClient`], so tests
//! inject mocks and the HTTP transport stays in one place.

mod http;

pub use http::HttpInferenceClient;
pub(crate) use http::snippet as http_snippet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::features::{Feature, FeatureActivation, FeatureEdit};

/// Upper bound the service enforces on `top_k`.
pub const TOP_K_MAX: usize = 100;

/// A single role/content turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Wire form of a model configuration submitted to the service:
/// the base model plus the edit list to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub base_model: String,
    pub edits: Vec<FeatureEdit>,
}

impl ModelSpec {
    pub fn new(base_model: impl Into<String>, edits: Vec<FeatureEdit>) -> Self {
        Self {
            base_model: base_model.into(),
            edits,
        }
    }
}

/// Generation parameters forwarded to the service.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_completion_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_completion_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// A chunk from a streaming generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationChunk {
    /// A text fragment.
    Delta(String),
    /// The stream finished cleanly.
    Done,
    /// The stream failed; no further chunks follow.
    Error(String),
}

/// Channel-backed receiver for generation chunks.
///
/// Providers push chunks from a background task; the orchestrator drains
/// them in order.
pub struct GenerationStream {
    rx: mpsc::Receiver<GenerationChunk>,
}

impl GenerationStream {
    /// Create a matched sender/receiver pair.
    pub fn pair(buffer: usize) -> (mpsc::Sender<GenerationChunk>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }

    /// Next chunk, or `None` once the sender is dropped.
    pub async fn next(&mut self) -> Option<GenerationChunk> {
        self.rx.recv().await
    }
}

/// Client contract for the inference/search service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Semantic feature search. `top_k` is already clamped by the caller.
    async fn search(&self, spec: &ModelSpec, query: &str, top_k: usize) -> Result<Vec<Feature>>;

    /// Direct lookup by id. Unmatched ids are dropped from the result.
    async fn features_by_id(&self, ids: &[String]) -> Result<Vec<Feature>>;

    /// Ranked feature-activation inspection over a conversation.
    async fn inspect(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        top_k: usize,
    ) -> Result<Vec<FeatureActivation>>;

    /// Batched chat generation.
    async fn chat(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String>;

    /// Streaming chat generation.
    async fn chat_stream(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<GenerationStream>;
}

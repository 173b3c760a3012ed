//! Completion orchestration.
//!
//! Runs one chat completion per request, either plain or with an
//! auto-steer comparison. Plain requests generate once against the
//! variant's confirmed edits. Auto-steer requests run the
//! [`AutoSteerPipeline`] first, then generate a baseline (confirmed
//! edits only) and a steered pass (confirmed plus the freshly proposed
//! pending edits) and reconcile both into a [`ComparisonResult`].
//!
//! # Design
//!
//! - The pipeline is best-effort: when it produces nothing, the request
//!   degrades to a baseline-only completion instead of failing.
//! - Upstream generation failure is terminal. Batched calls return the
//!   error; streams emit exactly one `error` event and close.
//! - Streamed chunks carry an explicit `phase` tag (`baseline` or
//!   `steered`) so consumers never have to infer phase from ordering,
//!   and the stream ends with exactly one `done` event carrying the
//!   assembled content and the optional comparison.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::autosteer::{AutoSteerPipeline, AutoSteerRun};
use crate::error::Result;
use crate::features::FeatureEdit;
use crate::inference::{
    ChatMessage, GenerationChunk, GenerationParams, InferenceClient, ModelSpec,
};
use crate::variant::VariantStore;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Which generation pass a streamed chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Baseline,
    Steered,
}

/// Baseline/steered pair produced by a successful auto-steer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub baseline_content: String,
    pub steered_content: String,
    /// Edits the pipeline proposed for the steered pass.
    pub applied_features: Vec<FeatureEdit>,
}

/// Batched completion response.
///
/// `content` is the steered text whenever a comparison exists, the
/// baseline text otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub variant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
}

/// One event on a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// A text fragment from one generation pass.
    Chunk { phase: Phase, text: String },

    /// Terminal: the full assembled content plus the comparison when the
    /// request was auto-steered.
    Done {
        content: String,
        variant_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        comparison: Option<ComparisonResult>,
    },

    /// Terminal: the stream failed. No further events follow.
    Error { message: String },
}

/// Channel-backed receiver for completion events.
pub struct CompletionStream {
    rx: mpsc::Receiver<CompletionEvent>,
}

impl CompletionStream {
    /// Next event, or `None` once the producing task has finished.
    pub async fn next(&mut self) -> Option<CompletionEvent> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// CompletionOrchestrator
// ---------------------------------------------------------------------------

/// Orchestrates baseline and steered generation for one request.
#[derive(Clone)]
pub struct CompletionOrchestrator {
    inference: Arc<dyn InferenceClient>,
    pipeline: Arc<AutoSteerPipeline>,
    store: Arc<VariantStore>,
    params: GenerationParams,
}

/// Model specs and pipeline outcome resolved before generation starts.
struct Prepared {
    variant_id: String,
    baseline: ModelSpec,
    steered: Option<ModelSpec>,
    run: Option<AutoSteerRun>,
}

impl CompletionOrchestrator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        pipeline: Arc<AutoSteerPipeline>,
        store: Arc<VariantStore>,
        params: GenerationParams,
    ) -> Self {
        Self {
            inference,
            pipeline,
            store,
            params,
        }
    }

    /// Batched completion. Runs the full request synchronously and
    /// returns one response.
    pub async fn complete(
        &self,
        session_id: &str,
        variant_id: Option<&str>,
        messages: &[ChatMessage],
        auto_steer: bool,
    ) -> Result<CompletionResponse> {
        let prepared = self.prepare(session_id, variant_id, messages, auto_steer).await;

        let baseline = self
            .inference
            .chat(&prepared.baseline, messages, self.params)
            .await?;

        let Some(steered_spec) = prepared.steered else {
            return Ok(CompletionResponse {
                content: baseline,
                variant_id: prepared.variant_id,
                comparison: None,
            });
        };

        let steered = self.inference.chat(&steered_spec, messages, self.params).await?;
        let applied = prepared.run.map(|r| r.applied).unwrap_or_default();

        Ok(CompletionResponse {
            content: steered.clone(),
            variant_id: prepared.variant_id,
            comparison: Some(ComparisonResult {
                baseline_content: baseline,
                steered_content: steered,
                applied_features: applied,
            }),
        })
    }

    /// Streamed completion. Returns immediately; a background task
    /// pushes ordered events (baseline chunks, steered chunks, one
    /// terminal `done` or `error`).
    pub fn complete_stream(
        &self,
        session_id: String,
        variant_id: Option<String>,
        messages: Vec<ChatMessage>,
        auto_steer: bool,
    ) -> CompletionStream {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();

        tokio::spawn(async move {
            let prepared = this
                .prepare(&session_id, variant_id.as_deref(), &messages, auto_steer)
                .await;

            let baseline =
                match this.stream_phase(&tx, Phase::Baseline, &prepared.baseline, &messages).await {
                    Some(text) => text,
                    None => return,
                };

            let Some(steered_spec) = prepared.steered else {
                let _ = tx
                    .send(CompletionEvent::Done {
                        content: baseline,
                        variant_id: prepared.variant_id,
                        comparison: None,
                    })
                    .await;
                return;
            };

            let steered =
                match this.stream_phase(&tx, Phase::Steered, &steered_spec, &messages).await {
                    Some(text) => text,
                    None => return,
                };

            let applied = prepared.run.map(|r| r.applied).unwrap_or_default();
            let _ = tx
                .send(CompletionEvent::Done {
                    content: steered.clone(),
                    variant_id: prepared.variant_id,
                    comparison: Some(ComparisonResult {
                        baseline_content: baseline,
                        steered_content: steered,
                        applied_features: applied,
                    }),
                })
                .await;
        });

        CompletionStream { rx }
    }

    /// Resolve model specs for the request, running the pipeline first
    /// when auto-steer is on. A pipeline that applies nothing leaves
    /// `steered` empty and the request degrades to baseline-only.
    async fn prepare(
        &self,
        session_id: &str,
        variant_id: Option<&str>,
        messages: &[ChatMessage],
        auto_steer: bool,
    ) -> Prepared {
        let variant = self.store.get_or_create(session_id, variant_id);
        let baseline = ModelSpec::new(variant.base_model.clone(), variant.confirmed_edit_list());

        let run = if auto_steer {
            match last_user_query(messages) {
                Some(query) => Some(
                    self.pipeline
                        .run(session_id, variant_id, query, messages)
                        .await,
                ),
                None => {
                    tracing::warn!(session_id, "auto-steer requested without a user message");
                    None
                }
            }
        } else {
            None
        };

        let steered = match &run {
            Some(r) if r.success => {
                // Re-read to pick up the edits the pipeline just proposed.
                let fresh = self.store.get_or_create(session_id, variant_id);
                Some(ModelSpec::new(
                    fresh.base_model.clone(),
                    fresh.effective_edit_list(),
                ))
            }
            _ => None,
        };

        Prepared {
            variant_id: variant.id,
            baseline,
            steered,
            run,
        }
    }

    /// Drain one generation stream, forwarding each delta as a tagged
    /// chunk. Returns the assembled text, or `None` after emitting the
    /// terminal error event.
    async fn stream_phase(
        &self,
        tx: &mpsc::Sender<CompletionEvent>,
        phase: Phase,
        spec: &ModelSpec,
        messages: &[ChatMessage],
    ) -> Option<String> {
        let mut stream = match self.inference.chat_stream(spec, messages, self.params).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx
                    .send(CompletionEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return None;
            }
        };

        let mut assembled = String::new();
        loop {
            match stream.next().await {
                Some(GenerationChunk::Delta(text)) => {
                    assembled.push_str(&text);
                    let _ = tx.send(CompletionEvent::Chunk { phase, text }).await;
                }
                Some(GenerationChunk::Done) | None => return Some(assembled),
                Some(GenerationChunk::Error(message)) => {
                    tracing::error!(?phase, message, "generation stream failed");
                    let _ = tx.send(CompletionEvent::Error { message }).await;
                    return None;
                }
            }
        }
    }
}

/// The most recent user turn, used as the auto-steer query.
fn last_user_query(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
}

//! Axum route handlers for the steering HTTP server.
//!
//! Session ids arrive in the request body (or query string for GETs) and
//! are opaque; a session's default variant materializes on first touch.
//! Handlers stay thin: validate, delegate to the owning component, map
//! the result to JSON. Error mapping lives on [`SteerError`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream;
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::analysis::AnalysisClient;
use crate::autosteer::{AutoSteerPipeline, AutoSteerRun};
use crate::completion::{CompletionOrchestrator, CompletionResponse};
use crate::error::{Result, SteerError};
use crate::inference::{ChatMessage, GenerationParams, InferenceClient, ModelSpec};
use crate::resolver::FeatureResolver;
use crate::variant::{SteeringLedger, VariantSnapshot, VariantStore};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VariantStore>,
    pub ledger: Arc<SteeringLedger>,
    pub resolver: Arc<FeatureResolver>,
    pub pipeline: Arc<AutoSteerPipeline>,
    pub orchestrator: Arc<CompletionOrchestrator>,
    inference: Arc<dyn InferenceClient>,
}

impl AppState {
    /// Wire the full component graph around the two upstream clients.
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        analysis: Arc<dyn AnalysisClient>,
        default_base_model: &str,
        params: GenerationParams,
    ) -> Self {
        let store = Arc::new(VariantStore::new(default_base_model));
        let ledger = Arc::new(SteeringLedger::new(store.clone()));
        let resolver = Arc::new(FeatureResolver::new(inference.clone()));
        let pipeline = Arc::new(AutoSteerPipeline::new(
            analysis,
            inference.clone(),
            store.clone(),
            ledger.clone(),
        ));
        let orchestrator = Arc::new(CompletionOrchestrator::new(
            inference.clone(),
            pipeline.clone(),
            store.clone(),
            params,
        ));
        Self {
            store,
            ledger,
            resolver,
            pipeline,
            orchestrator,
            inference,
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/features/search", post(search_handler))
        .route("/features/inspect", post(inspect_handler))
        .route("/variants/:id/steer", post(steer_handler))
        .route("/variants/:id/commit", post(commit_handler))
        .route("/variants/:id/reject", post(reject_handler))
        .route("/variants/:id", get(get_variant_handler))
        .route("/variants/:id/clone", post(clone_variant_handler))
        .route("/auto-steer", post(auto_steer_handler))
        .route("/chat/completions", post(chat_completions_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchRequest {
    session_id: String,
    variant_id: Option<String>,
    query: String,
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct InspectRequest {
    session_id: String,
    variant_id: Option<String>,
    messages: Vec<ChatMessage>,
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SteerRequest {
    session_id: String,
    feature_id: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct AutoSteerRequest {
    session_id: String,
    variant_id: Option<String>,
    query: String,
    #[serde(default)]
    context: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionRequest {
    session_id: String,
    variant_id: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    auto_steer: bool,
    #[serde(default)]
    stream: bool,
}

fn require_session(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(SteerError::validation("session_id must not be empty"));
    }
    Ok(())
}

/// The model spec a variant's searches and inspections run against.
fn variant_spec(state: &AppState, session_id: &str, variant_id: Option<&str>) -> ModelSpec {
    let variant = state.store.get_or_create(session_id, variant_id);
    ModelSpec::new(variant.base_model.clone(), variant.effective_edit_list())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "steerage",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// POST /features/search — semantic feature search against a variant.
async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Value>> {
    require_session(&request.session_id)?;
    let spec = variant_spec(&state, &request.session_id, request.variant_id.as_deref());
    let features = state
        .resolver
        .search(&spec, &request.query, request.top_k)
        .await?;
    Ok(Json(serde_json::json!({ "features": features })))
}

/// POST /features/inspect — feature activations over a conversation.
async fn inspect_handler(
    State(state): State<AppState>,
    Json(request): Json<InspectRequest>,
) -> Result<Json<Value>> {
    require_session(&request.session_id)?;
    if request.messages.is_empty() {
        return Err(SteerError::validation("messages must not be empty"));
    }
    let top_k = FeatureResolver::clamp_top_k(request.top_k)?;
    let spec = variant_spec(&state, &request.session_id, request.variant_id.as_deref());
    let activations = state.inference.inspect(&spec, &request.messages, top_k).await?;
    Ok(Json(serde_json::json!({ "activations": activations })))
}

/// POST /variants/{id}/steer — propose a pending edit.
async fn steer_handler(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    Json(request): Json<SteerRequest>,
) -> Result<Json<Value>> {
    require_session(&request.session_id)?;
    let value = state.ledger.propose(
        &request.session_id,
        Some(&variant_id),
        &request.feature_id,
        request.value,
    )?;
    Ok(Json(serde_json::json!({
        "accepted": true,
        "feature_id": request.feature_id,
        "value": value,
    })))
}

/// POST /variants/{id}/commit — promote pending edits to confirmed.
async fn commit_handler(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Value>> {
    require_session(&request.session_id)?;
    state.ledger.commit(&request.session_id, Some(&variant_id))?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /variants/{id}/reject — discard pending edits.
async fn reject_handler(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Value>> {
    require_session(&request.session_id)?;
    state.ledger.reject(&request.session_id, Some(&variant_id))?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// GET /variants/{id}?session_id= — serialize a variant snapshot.
async fn get_variant_handler(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<VariantSnapshot>> {
    require_session(&query.session_id)?;
    let snapshot = state.store.serialize(&query.session_id, Some(&variant_id))?;
    Ok(Json(snapshot))
}

/// POST /variants/{id}/clone — clone a variant's confirmed edits into a
/// fresh variant in the same session.
async fn clone_variant_handler(
    State(state): State<AppState>,
    Path(variant_id): Path<String>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<VariantSnapshot>> {
    require_session(&request.session_id)?;
    let clone = state.store.clone_variant(&request.session_id, &variant_id)?;
    Ok(Json(VariantSnapshot::of(&clone)))
}

/// POST /auto-steer — run the pipeline against a variant.
async fn auto_steer_handler(
    State(state): State<AppState>,
    Json(request): Json<AutoSteerRequest>,
) -> Result<Json<AutoSteerRun>> {
    require_session(&request.session_id)?;
    if request.query.trim().is_empty() {
        return Err(SteerError::validation("query must not be empty"));
    }
    let run = state
        .pipeline
        .run(
            &request.session_id,
            request.variant_id.as_deref(),
            &request.query,
            &request.context,
        )
        .await;
    Ok(Json(run))
}

/// POST /chat/completions — batched JSON or SSE stream of tagged events.
async fn chat_completions_handler(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Response> {
    require_session(&request.session_id)?;
    if request.messages.is_empty() {
        return Err(SteerError::validation("messages must not be empty"));
    }

    if request.stream {
        let events = state.orchestrator.complete_stream(
            request.session_id,
            request.variant_id,
            request.messages,
            request.auto_steer,
        );
        let sse_stream = stream::unfold(events, |mut events| async move {
            let event = events.next().await?;
            Some((Event::default().json_data(&event), events))
        });
        return Ok(Sse::new(sse_stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let response: CompletionResponse = state
        .orchestrator
        .complete(
            &request.session_id,
            request.variant_id.as_deref(),
            &request.messages,
            request.auto_steer,
        )
        .await?;
    Ok(Json(response).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! HTTP server for the steering API.
//!
//! Exposes variant management, feature search, auto-steer, and chat
//! completion (batched or SSE-streamed) as an axum service.
//!
//! # Endpoints
//!
//! - `GET  /health`               — Liveness probe
//! - `POST /features/search`      — Semantic feature search
//! - `POST /features/inspect`     — Feature-activation inspection
//! - `POST /variants/{id}/steer`  — Propose a pending edit
//! - `POST /variants/{id}/commit` — Promote pending edits
//! - `POST /variants/{id}/reject` — Discard pending edits
//! - `GET  /variants/{id}`        — Serialize a variant snapshot
//! - `POST /variants/{id}/clone`  — Clone a variant's confirmed edits
//! - `POST /auto-steer`           — Run the auto-steer pipeline
//! - `POST /chat/completions`     — Batched or streamed completion

pub mod routes;

pub use routes::{app_router, AppState};

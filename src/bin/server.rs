//! steerage HTTP server binary.
//!
//! Starts the axum server exposing feature search, variant steering,
//! auto-steer, and chat completion endpoints.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `INFERENCE_BASE_URL` / `INFERENCE_API_KEY` — feature-steerable inference service
//! - `ANALYSIS_BASE_URL` / `ANALYSIS_API_KEY` / `ANALYSIS_MODEL` — analysis capability
//! - `DEFAULT_BASE_MODEL` — base model for new variants
//! - `RUST_LOG` — Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use steerage::analysis::HttpAnalysisClient;
use steerage::config::settings;
use steerage::inference::{GenerationParams, HttpInferenceClient};
use steerage::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,steerage=debug".into()),
        )
        .init();
    // `log::debug!` lines from the HTTP clients go through the log facade.
    let _ = env_logger::try_init();

    let settings = settings();
    let bind_addr = format!("0.0.0.0:{}", settings.port);

    let inference = Arc::new(HttpInferenceClient::new(
        settings.inference_base_url.clone(),
        settings.inference_api_key.clone(),
    ));
    let analysis = Arc::new(HttpAnalysisClient::new(
        settings.analysis_base_url.clone(),
        settings.analysis_api_key.clone(),
        settings.analysis_model.clone(),
    ));

    let params = GenerationParams {
        max_completion_tokens: settings.max_completion_tokens,
        temperature: settings.temperature,
        top_p: settings.top_p,
    };
    let state = AppState::new(inference, analysis, &settings.default_base_model, params);

    let app = app_router(state);

    tracing::info!("steerage server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health            — liveness probe");
    tracing::info!("  POST /features/search   — semantic feature search");
    tracing::info!("  POST /variants/{{id}}/…   — steer / commit / reject / clone");
    tracing::info!("  POST /auto-steer        — auto-steer pipeline");
    tracing::info!("  POST /chat/completions  — batched or streamed completion");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

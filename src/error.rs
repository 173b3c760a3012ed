//! Error taxonomy for the steering service.
//!
//! Three families: validation errors (rejected, never retried), not-found
//! errors, and upstream errors from the inference or analysis services.
//! Best-effort pipeline stages catch upstream errors internally and
//! degrade to partial results; only the read path propagates them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by store, ledger, resolver, and orchestrator operations.
#[derive(Debug, Error)]
pub enum SteerError {
    /// Client-supplied value rejected (out-of-range strength, empty query,
    /// bad top_k).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unknown session or variant.
    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    /// No feature matched a label lookup.
    #[error("feature '{label}' not found")]
    FeatureNotFound { label: String },

    /// Transport or protocol failure talking to an external capability.
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl SteerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// HTTP status this error maps to at the API layer.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } | Self::FeatureNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for SteerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SteerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SteerError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SteerError::not_found("variant", "x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SteerError::FeatureNotFound { label: "humor".into() }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SteerError::upstream("boom").status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_display() {
        let err = SteerError::not_found("variant", "abc");
        assert_eq!(err.to_string(), "variant 'abc' not found");
    }
}

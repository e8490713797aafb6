// =============================================================================
// Error kinds — HTTP boundary mapping
// =============================================================================
//
// Internally almost everything propagates `anyhow::Result` (matching the
// style of `config.rs` / `backfill/provider.rs`). At the dashboard HTTP
// boundary we need a typed error so handlers can map failures to the status
// codes the API contract promises: 400 (client input), 404 (missing data),
// 500 (internal I/O/decode), 503 (feature disabled, e.g. no vendor
// credentials configured).
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
    #[error("feature disabled: {0}")]
    FeatureDisabled(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::FeatureDisabled(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

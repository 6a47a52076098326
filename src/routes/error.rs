use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::store::StoreError;

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    Validation(#[from] garde::Report),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Job store error");
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::application::AnalyticsError;
use crate::io::IngestionError;

/// Error returned by API handlers, rendered as `{ "error": code, "message": text }`.
#[derive(Debug)]
pub enum ApiError {
    Analytics(AnalyticsError),
    Internal(String),
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        ApiError::Analytics(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Analytics(err) => analytics_error_to_response(err),
            ApiError::Internal(message) => {
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}

pub fn analytics_error_to_response(err: AnalyticsError) -> Response {
    let status = match &err {
        AnalyticsError::UnknownItem(_) => StatusCode::NOT_FOUND,
        AnalyticsError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        AnalyticsError::InsufficientHistory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyticsError::QuantityOverflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyticsError::Ingestion(IngestionError::Io(_)) => StatusCode::SERVICE_UNAVAILABLE,
        AnalyticsError::Ingestion(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };

    // Rejected rows are what the caller needs to fix the file.
    if let AnalyticsError::Ingestion(IngestionError::NoValidRows { diagnostics }) = &err {
        return (
            status,
            Json(json!({
                "error": err.code(),
                "message": err.to_string(),
                "diagnostics": diagnostics,
            })),
        )
            .into_response();
    }

    json_error(status, err.code(), err.to_string())
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

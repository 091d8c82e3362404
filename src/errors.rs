use crate::services::flipbook_service::FlipbookError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message returned for every server-side failure. The cause is only logged.
pub const GENERIC_FAILURE: &str = "Failed to process flipbook";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<FlipbookError> for AppError {
    fn from(err: FlipbookError) -> Self {
        match err {
            FlipbookError::NoValidFiles => AppError::bad_request("No valid JPG files uploaded"),
            err if err.is_client_error() => {
                tracing::warn!("rejected upload: {}", err);
                AppError::bad_request(err.to_string())
            }
            err => {
                tracing::error!("flipbook processing failed: {:?}", err);
                AppError::internal(GENERIC_FAILURE)
            }
        }
    }
}

//! # ApiError
//!
//! Renders `AppError` as a JSON `{"error": "..."}` body with the matching
//! status. Internal failures are logged and replaced by a message naming
//! the operation that failed.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cb_core::AppError;
use serde_json::json;
use tracing::{debug, error};

#[derive(Debug)]
pub struct ApiError {
    error: AppError,
    /// Shown instead of the details of an internal failure.
    fallback: &'static str,
}

impl ApiError {
    pub fn new(error: AppError, fallback: &'static str) -> Self {
        Self { error, fallback }
    }

    pub fn status(&self) -> StatusCode {
        match self.error {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Relay(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `map_err` adapter: `.map_err(failed("Could not load posts."))`.
pub fn failed(fallback: &'static str) -> impl FnOnce(AppError) -> ApiError {
    move |error| ApiError::new(error, fallback)
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection.body_text(), "rejected request body");
        Self::new(AppError::validation("Request body must be valid JSON."), "Invalid request.")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(error = %rejection.body_text(), "rejected query string");
        Self::new(AppError::validation("Invalid query string."), "Invalid request.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.error {
            AppError::Internal(err) => {
                error!(error = ?err, "{}", self.fallback);
                self.fallback.to_owned()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

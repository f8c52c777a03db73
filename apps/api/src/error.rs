use axum::Json;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use vapi_core::AppError;

mod types;

pub use types::ProblemDetails;

/// Media type of every error body.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// HTTP API error wrapper around core application errors.
#[derive(Debug)]
pub struct ApiError {
    error: AppError,
    instance: Option<String>,
}

impl ApiError {
    /// Sets the request path reported as the problem `instance`.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    fn status(&self) -> StatusCode {
        match self.error {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self {
            error,
            instance: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.error, "request failed");
        }

        let payload = Json(ProblemDetails::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error"),
            self.error.detail(),
            self.instance,
        ));

        let mut response = (status, payload).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}

use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use vapi_core::AppError;

use crate::middleware::{
    API_KEY_HEADER, IDEMPOTENCY_KEY_HEADER, RATE_LIMIT_HEADER, RATE_LIMIT_POLICY_HEADER,
};

pub(super) fn build_cors_layer(allowed_origin: &str) -> Result<CorsLayer, AppError> {
    Ok(CorsLayer::new()
        .allow_origin(HeaderValue::from_str(allowed_origin).map_err(|error| {
            AppError::Validation(format!("invalid CORS_ALLOWED_ORIGIN: {error}"))
        })?)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(RATE_LIMIT_HEADER),
            HeaderName::from_static(RATE_LIMIT_POLICY_HEADER),
            RETRY_AFTER,
        ]))
}

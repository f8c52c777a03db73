use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use vapi_application::UpstreamRequest;
use vapi_core::AppError;

use crate::error::ApiError;
use crate::snapshot::{self, UpstreamFailure};
use crate::state::AppState;

/// Forwards any request without a local route to the upstream service.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |value| value.as_str().to_owned());

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.max_request_body_bytes).await {
        Ok(body) => body,
        Err(error) => {
            return ApiError::from(AppError::Validation(format!(
                "failed to read request body: {error}"
            )))
            .with_instance(path)
            .into_response();
        }
    };

    let upstream_request = UpstreamRequest {
        method: parts.method,
        path_and_query,
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    };

    match state.forwarder.forward(upstream_request).await {
        Ok(response) => snapshot::restore(response),
        Err(error @ AppError::Upstream(_)) => {
            let failure = UpstreamFailure(error.detail().to_owned());
            let mut response = ApiError::from(error).with_instance(path).into_response();
            response.extensions_mut().insert(failure);
            response
        }
        Err(error) => ApiError::from(error).with_instance(path).into_response(),
    }
}

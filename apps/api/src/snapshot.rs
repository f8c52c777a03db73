//! Conversions between axum responses and stored response snapshots.

use axum::body::{Body, to_bytes};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use vapi_core::{AppError, AppResult};
use vapi_domain::ResponseSnapshot;

/// Marks a response produced because the upstream could not be reached.
///
/// Such responses are infrastructure failures, not results, and are never recorded.
#[derive(Debug, Clone)]
pub struct UpstreamFailure(pub String);

/// Headers recomputed for every rebuilt response.
const FRAMING_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

/// Buffers a response into a snapshot.
pub async fn capture(response: Response) -> AppResult<ResponseSnapshot> {
    if let Some(failure) = response.extensions().get::<UpstreamFailure>() {
        return Err(AppError::Upstream(failure.0.clone()));
    }

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter(|(name, _)| !FRAMING_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|error| AppError::Upstream(format!("failed to read response body: {error}")))?;

    Ok(ResponseSnapshot::new(status, headers, body.to_vec()))
}

/// Rebuilds a response from a snapshot, headers in their recorded order.
pub fn restore(snapshot: ResponseSnapshot) -> Response {
    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);

    for (name, value) in &snapshot.headers {
        if FRAMING_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().append(name, value);
        }
    }

    response
}

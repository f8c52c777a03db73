use std::net::SocketAddr;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::http::header::RETRY_AFTER;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;
use vapi_application::{EdgeRequest, EdgeResolution};
use vapi_core::{AppError, AppResult, CredentialId};
use vapi_domain::RateLimitDecision;

use crate::error::ApiError;
use crate::snapshot;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const RATE_LIMIT_HEADER: &str = "ratelimit";
pub const RATE_LIMIT_POLICY_HEADER: &str = "ratelimit-policy";

const CLIENT_ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Rate limits, deduplicates and forwards one request.
///
/// Once the pipeline has run, the response carries `RateLimit` and
/// `RateLimit-Policy` whether it was executed, replayed or failed, and on
/// rejection unless the exhausted policy opted out. Requests refused before
/// the pipeline (no resolvable credential, oversized body) are answered
/// without them since no budget was evaluated.
pub async fn edge_resilience(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(address)| *address);

    let credential = match resolve_credential(request.headers(), peer, &state.credential_secret) {
        Ok(credential) => credential,
        Err(error) => return ApiError::from(error).with_instance(path).into_response(),
    };

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.max_request_body_bytes).await {
        Ok(body) => body,
        Err(_) => {
            let error = AppError::Validation(format!(
                "request body exceeds {} bytes",
                state.max_request_body_bytes
            ));
            return ApiError::from(error).with_instance(path).into_response();
        }
    };

    let mut edge_request = EdgeRequest::new(credential, parts.method.clone(), path.as_str())
        .with_body(body.to_vec());
    edge_request.idempotency_key = parts
        .headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    let inner_request = Request::from_parts(parts, Body::from(body));
    let downstream = move || async move { snapshot::capture(next.run(inner_request).await).await };

    let outcome = state.pipeline.process(&edge_request, downstream).await;
    let mut response = match outcome.resolution {
        EdgeResolution::Rejected => rejection_response(&outcome.decision, path),
        EdgeResolution::Responded {
            response,
            disposition,
        } => {
            debug!(
                credential = %edge_request.credential,
                status = response.status,
                disposition = disposition.as_str(),
                "request responded"
            );
            snapshot::restore(response)
        }
        EdgeResolution::Failed(error) => ApiError::from(error).with_instance(path).into_response(),
    };

    if outcome.decision.carries_headers() {
        attach_rate_limit_headers(response.headers_mut(), &outcome.decision);
    }
    response
}

/// Resolves the caller identity from the API key or, without one, the client address.
///
/// A blank `X-API-KEY` counts as absent.
pub fn resolve_credential(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    secret: &str,
) -> AppResult<CredentialId> {
    if let Some(api_key) = headers.get(API_KEY_HEADER) {
        let api_key = api_key.to_str().map_err(|_| {
            AppError::Unauthorized("X-API-KEY header must be visible ASCII".to_owned())
        })?;
        if !api_key.trim().is_empty() {
            return CredentialId::from_api_key(secret, api_key);
        }
    }

    let forwarded = CLIENT_ADDRESS_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    });

    let address = forwarded
        .or_else(|| peer.map(|peer| peer.ip().to_string()))
        .ok_or_else(|| AppError::Validation("client address could not be determined".to_owned()))?;

    CredentialId::from_client_address(&address)
}

fn rejection_response(decision: &RateLimitDecision, path: String) -> Response {
    let policy = decision
        .statuses
        .iter()
        .find(|status| status.exhausted)
        .map(|status| status.name.as_str())
        .unwrap_or("default");
    let retry_after = decision.retry_after_seconds().max(1);

    let mut response = ApiError::from(AppError::RateLimited(format!(
        "rate limit '{policy}' exceeded, retry in {retry_after} seconds"
    )))
    .with_instance(path)
    .into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

fn attach_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    for (name, value) in [
        (RATE_LIMIT_POLICY_HEADER, decision.policy_header()),
        (RATE_LIMIT_HEADER, decision.limit_header()),
    ] {
        let Some(value) = value.and_then(|value| HeaderValue::from_str(&value).ok()) else {
            continue;
        };
        headers.insert(HeaderName::from_static(name), value);
    }
}

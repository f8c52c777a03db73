use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode};
use tower::ServiceExt;
use vapi_application::{
    Clock, EdgePipelineService, IdempotencyConfig, IdempotencyService, KeyValueStore,
    RateLimitConfig, RateLimitService, UpstreamForwarder, UpstreamRequest,
};
use vapi_core::{AppError, AppResult};
use vapi_domain::{RateLimitPolicy, ResponseSnapshot, RoutePolicies};
use vapi_infrastructure::{InMemoryKeyValueStore, SystemClock};

use super::build_router;
use crate::state::AppState;

#[derive(Default)]
struct FakeUpstream {
    calls: AtomicUsize,
    unreachable: AtomicBool,
}

#[async_trait]
impl UpstreamForwarder for FakeUpstream {
    async fn forward(&self, request: UpstreamRequest) -> AppResult<ResponseSnapshot> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("connection refused".to_owned()));
        }

        Ok(ResponseSnapshot::new(
            201,
            vec![("content-type".to_owned(), "text/plain".to_owned())],
            format!(
                "call {call}: {} {} {}",
                request.method,
                request.path_and_query,
                String::from_utf8_lossy(&request.body)
            ),
        ))
    }
}

fn default_policy(capacity: u32) -> RateLimitPolicy {
    RateLimitPolicy::new("default", capacity, 60)
        .unwrap_or_else(|error| panic!("invalid test policy: {error}"))
}

fn app(capacity: u32, upstream: Arc<FakeUpstream>, cors_origin: Option<&str>) -> Router {
    let policies = RoutePolicies::new(vec![default_policy(capacity)], vec![])
        .unwrap_or_else(|error| panic!("invalid test policies: {error}"));
    app_with_policies(policies, upstream, cors_origin)
}

fn app_with_policies(
    policies: RoutePolicies,
    upstream: Arc<FakeUpstream>,
    cors_origin: Option<&str>,
) -> Router {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new(clock.clone()));

    let state = AppState {
        pipeline: EdgePipelineService::new(
            RateLimitService::new(store.clone(), clock.clone(), RateLimitConfig::new("test")),
            IdempotencyService::new(store.clone(), clock, IdempotencyConfig::new("test")),
            policies,
        ),
        forwarder: upstream,
        store,
        store_backend: "in_memory",
        credential_secret: Arc::from("router-test-fingerprint-secret"),
        max_request_body_bytes: 1024,
    };

    build_router(state, cors_origin).unwrap_or_else(|error| panic!("invalid router: {error}"))
}

fn post(path: &str, idempotency_key: Option<&str>, body: impl Into<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("x-forwarded-for", "203.0.113.9")
        .header("content-type", "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }
    builder
        .body(Body::from(body.into()))
        .unwrap_or_else(|error| panic!("invalid test request: {error}"))
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .unwrap_or_else(|error| panic!("invalid test request: {error}"))
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    match app.clone().oneshot(request).await {
        Ok(response) => response,
        Err(error) => match error {},
    }
}

fn header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn body_text(response: Response<Body>) -> String {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn health_is_not_rate_limited() {
    let app = app(1, Arc::new(FakeUpstream::default()), None);

    for _ in 0..5 {
        let response = send(&app, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "ratelimit"), None);
    }
}

#[tokio::test]
async fn admitted_requests_are_forwarded_with_rate_limit_headers() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = app(5, upstream.clone(), None);

    let response = send(&app, get("/api/campaigns?page=2")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header(&response, "ratelimit-policy").as_deref(),
        Some("\"default\";q=5;w=60")
    );
    assert_eq!(
        header(&response, "ratelimit").as_deref(),
        Some("\"default\";r=4;t=0")
    );
    assert_eq!(
        body_text(response).await,
        "call 1: GET /api/campaigns?page=2 "
    );
}

#[tokio::test]
async fn exhausted_budget_returns_problem_details_without_forwarding() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = app(1, upstream.clone(), None);

    assert_eq!(send(&app, get("/api/campaigns")).await.status(), StatusCode::CREATED);

    let rejected = send(&app, get("/api/campaigns")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&rejected, "retry-after").as_deref(), Some("60"));
    assert_eq!(
        header(&rejected, "ratelimit").as_deref(),
        Some("\"default\";r=0;t=60")
    );
    assert_eq!(
        header(&rejected, "content-type").as_deref(),
        Some("application/problem+json")
    );

    let body: serde_json::Value =
        serde_json::from_str(&body_text(rejected).await).unwrap_or_default();
    assert_eq!(body["status"], 429);
    assert_eq!(body["instance"], "/api/campaigns");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quiet_policy_rejects_with_retry_after_only() {
    let upstream = Arc::new(FakeUpstream::default());
    let policies = RoutePolicies::new(
        vec![default_policy(1).with_rejection_headers(false)],
        vec![],
    )
    .unwrap_or_else(|error| panic!("invalid test policies: {error}"));
    let app = app_with_policies(policies, upstream.clone(), None);

    let admitted = send(&app, get("/api/campaigns")).await;
    assert!(header(&admitted, "ratelimit").is_some());

    let rejected = send(&app, get("/api/campaigns")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&rejected, "retry-after").as_deref(), Some("60"));
    assert_eq!(header(&rejected, "ratelimit"), None);
    assert_eq!(header(&rejected, "ratelimit-policy"), None);
}

#[tokio::test]
async fn excluded_paths_are_forwarded_without_limiting() {
    let upstream = Arc::new(FakeUpstream::default());
    let policies = RoutePolicies::new(vec![default_policy(1)], vec![])
        .and_then(|policies| policies.with_excluded_prefixes(vec!["/api/docs".to_owned()]))
        .unwrap_or_else(|error| panic!("invalid test policies: {error}"));
    let app = app_with_policies(policies, upstream.clone(), None);

    for _ in 0..3 {
        let response = send(&app, get("/api/docs/openapi.json")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, "ratelimit"), None);
    }
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);

    assert_eq!(send(&app, get("/api/campaigns")).await.status(), StatusCode::CREATED);
    assert_eq!(
        send(&app, get("/api/campaigns")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn retried_post_replays_the_first_response() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = app(10, upstream.clone(), None);

    let first = send(&app, post("/api/campaigns", Some("key-1"), "{\"name\":\"a\"}")).await;
    let second = send(&app, post("/api/campaigns", Some("key-1"), "{\"name\":\"a\"}")).await;

    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        header(&second, "ratelimit").as_deref(),
        Some("\"default\";r=8;t=0")
    );
    assert_eq!(body_text(first).await, body_text(second).await);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reused_key_with_other_body_conflicts() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = app(10, upstream.clone(), None);

    let first = send(&app, post("/api/campaigns", Some("key-1"), "{\"name\":\"a\"}")).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let conflict = send(&app, post("/api/campaigns", Some("key-1"), "{\"name\":\"b\"}")).await;
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    assert!(header(&conflict, "ratelimit").is_some());
    assert!(body_text(conflict).await.contains("key-1"));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_idempotency_key_is_a_bad_request() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = app(10, upstream.clone(), None);

    let key = "k".repeat(256);
    let response = send(&app, post("/api/campaigns", Some(&key), "{}")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_upstream_is_not_recorded() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.unreachable.store(true, Ordering::SeqCst);
    let app = app(10, upstream.clone(), None);

    let failed = send(&app, post("/api/campaigns", Some("key-1"), "{}")).await;
    assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);

    upstream.unreachable.store(false, Ordering::SeqCst);
    let retried = send(&app, post("/api/campaigns", Some("key-1"), "{}")).await;
    assert_eq!(retried.status(), StatusCode::CREATED);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = app(10, upstream.clone(), None);

    let response = send(&app, post("/api/uploads", None, "x".repeat(2048))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&response, "ratelimit"), None);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cors_exposes_rate_limit_headers() {
    let app = app(10, Arc::new(FakeUpstream::default()), Some("https://app.example.com"));

    let request = Request::builder()
        .uri("/api/campaigns")
        .header("origin", "https://app.example.com")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .unwrap_or_else(|error| panic!("invalid test request: {error}"));
    let response = send(&app, request).await;

    let exposed = header(&response, "access-control-expose-headers").unwrap_or_default();
    assert!(exposed.contains("ratelimit"));
    assert!(exposed.contains("retry-after"));
}

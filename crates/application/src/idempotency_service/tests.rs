use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::Method;
use vapi_core::{AppError, AppResult, CredentialId};
use vapi_domain::{BodyFingerprint, IDEMPOTENCY_RECORD_TTL_MS, IdempotencyRecord, ResponseSnapshot};

use crate::test_support::{FakeClock, FakeKeyValueStore};
use crate::{Clock, EdgeRequest, KeyValueStore, StoreFailureMode};

use super::{IdempotencyConfig, IdempotencyService, ResponseDisposition};

type DownstreamFuture = Pin<Box<dyn Future<Output = AppResult<ResponseSnapshot>> + Send>>;

const RECORD_KEY: &str = "test:idem:addr:10.0.0.1:key-1";

fn service(
    failure_mode: StoreFailureMode,
    wait_timeout: Duration,
) -> (IdempotencyService, Arc<FakeKeyValueStore>, Arc<FakeClock>) {
    let clock = FakeClock::at(1_700_000_000_000);
    let store = FakeKeyValueStore::new(clock.clone());
    let config = IdempotencyConfig::new("test")
        .with_failure_mode(failure_mode)
        .with_timeouts(Duration::from_secs(60), wait_timeout)
        .with_poll_interval(Duration::from_millis(10));
    let service = IdempotencyService::new(store.clone(), clock.clone(), config);
    (service, store, clock)
}

fn default_service() -> (IdempotencyService, Arc<FakeKeyValueStore>, Arc<FakeClock>) {
    service(StoreFailureMode::FailOpen, Duration::from_secs(5))
}

fn request(method: Method, body: &str) -> EdgeRequest {
    let credential = CredentialId::from_client_address("10.0.0.1")
        .unwrap_or_else(|error| panic!("invalid test credential: {error}"));
    EdgeRequest::new(credential, method, "/api/campaigns")
        .with_idempotency_key("key-1")
        .with_body(body)
}

fn created() -> ResponseSnapshot {
    ResponseSnapshot::new(
        201,
        vec![("content-type".to_owned(), "application/json".to_owned())],
        "{\"id\":42}",
    )
}

fn downstream(
    calls: &Arc<AtomicUsize>,
    result: AppResult<ResponseSnapshot>,
    delay: Duration,
) -> impl FnOnce() -> DownstreamFuture + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

#[tokio::test]
async fn retry_replays_recorded_response_without_second_call() {
    let (service, store, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{\"name\":\"Saltmarsh\"}");

    let first = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;
    let second = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;

    let first = first.unwrap_or_else(|error| panic!("first request failed: {error}"));
    let second = second.unwrap_or_else(|error| panic!("retry failed: {error}"));
    assert_eq!(first.disposition, ResponseDisposition::Executed);
    assert_eq!(second.disposition, ResponseDisposition::Replayed);
    assert_eq!(first.response, second.response);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.ttl_ms(RECORD_KEY).await,
        Some(IDEMPOTENCY_RECORD_TTL_MS)
    );
}

#[tokio::test]
async fn reused_key_with_different_body_is_a_conflict() {
    let (service, _, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = service
        .handle(
            &request(Method::POST, "{\"name\":\"a\"}"),
            downstream(&calls, Ok(created()), Duration::ZERO),
        )
        .await;
    assert!(first.is_ok());

    let second = service
        .handle(
            &request(Method::POST, "{\"name\":\"b\"}"),
            downstream(&calls, Ok(created()), Duration::ZERO),
        )
        .await;
    assert!(matches!(second, Err(AppError::Conflict(detail)) if detail.contains("key-1")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_share_one_execution() {
    let (service, _, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{\"name\":\"Saltmarsh\"}");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let request = request.clone();
        let downstream = downstream(&calls, Ok(created()), Duration::from_millis(100));
        handles.push(tokio::spawn(async move {
            service.handle(&request, downstream).await
        }));
    }

    let mut responses = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(outcome)) => responses.push(outcome.response),
            Ok(Err(error)) => panic!("duplicate request failed: {error}"),
            Err(error) => panic!("duplicate request task failed: {error}"),
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(responses.len(), 8);
    assert!(responses.iter().all(|response| *response == created()));
}

#[tokio::test]
async fn naturally_idempotent_methods_and_missing_keys_bypass_the_store() {
    let (service, store, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));

    for method in [Method::GET, Method::DELETE, Method::HEAD] {
        let outcome = service
            .handle(
                &request(method, ""),
                downstream(&calls, Ok(created()), Duration::ZERO),
            )
            .await;
        assert_eq!(
            outcome.ok().map(|outcome| outcome.disposition),
            Some(ResponseDisposition::Bypassed)
        );
    }

    let mut without_key = request(Method::POST, "{}");
    without_key.idempotency_key = None;
    for _ in 0..2 {
        let outcome = service
            .handle(
                &without_key,
                downstream(&calls, Ok(created()), Duration::ZERO),
            )
            .await;
        assert!(outcome.is_ok());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn invalid_key_is_rejected_before_downstream() {
    let (service, _, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}").with_idempotency_key("has space");

    let outcome = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;
    assert!(matches!(outcome, Err(AppError::Validation(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn error_responses_are_cached_like_any_other() {
    let (service, _, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::PUT, "{}");
    let failure = ResponseSnapshot::new(500, vec![], "boom");

    for expected in [ResponseDisposition::Executed, ResponseDisposition::Replayed] {
        let outcome = service
            .handle(
                &request,
                downstream(&calls, Ok(failure.clone()), Duration::ZERO),
            )
            .await;
        let outcome = outcome.unwrap_or_else(|error| panic!("request failed: {error}"));
        assert_eq!(outcome.disposition, expected);
        assert_eq!(outcome.response.status, 500);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn infrastructure_failure_releases_the_key_for_retry() {
    let (service, store, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}");

    let failed = service
        .handle(
            &request,
            downstream(
                &calls,
                Err(AppError::Upstream("connection refused".to_owned())),
                Duration::ZERO,
            ),
        )
        .await;
    assert!(matches!(failed, Err(AppError::Upstream(_))));
    assert_eq!(store.len().await, 0);

    let retried = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;
    assert_eq!(
        retried.ok().map(|outcome| outcome.disposition),
        Some(ResponseDisposition::Executed)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn duplicate_gives_up_when_wait_budget_runs_out() {
    let (service, _, _) = service(StoreFailureMode::FailOpen, Duration::from_millis(50));
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}");

    let first = {
        let service = service.clone();
        let request = request.clone();
        let downstream = downstream(&calls, Ok(created()), Duration::from_millis(400));
        tokio::spawn(async move { service.handle(&request, downstream).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let duplicate = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;
    assert!(
        matches!(duplicate, Err(AppError::Conflict(detail)) if detail.contains("still being processed"))
    );

    let first = first.await;
    assert!(matches!(first, Ok(Ok(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn abandoned_claim_is_taken_over() {
    let (service, store, clock) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}");

    let stale = IdempotencyRecord::pending(
        BodyFingerprint::compute("POST", "/api/campaigns", b"{}"),
        "crashed-executor",
        clock.now_ms(),
        1_000,
    );
    let seeded = match stale.encode() {
        Ok(encoded) => store.set(RECORD_KEY, &encoded, 3_600_000).await,
        Err(error) => Err(error),
    };
    assert!(seeded.is_ok());
    clock.advance(1_000);

    let outcome = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;
    assert_eq!(
        outcome.ok().map(|outcome| outcome.disposition),
        Some(ResponseDisposition::Executed)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.ttl_ms(RECORD_KEY).await,
        Some(IDEMPOTENCY_RECORD_TTL_MS - 1_000)
    );
}

#[tokio::test]
async fn response_is_recorded_after_caller_goes_away() {
    let (service, _, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}");

    let abandoned = {
        let service = service.clone();
        let request = request.clone();
        let downstream = downstream(&calls, Ok(created()), Duration::from_millis(100));
        tokio::spawn(async move { service.handle(&request, downstream).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    abandoned.abort();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let retried = service
        .handle(&request, downstream(&calls, Ok(created()), Duration::ZERO))
        .await;
    let retried = retried.unwrap_or_else(|error| panic!("retry failed: {error}"));
    assert_eq!(retried.disposition, ResponseDisposition::Replayed);
    assert_eq!(retried.response, created());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn store_outage_fails_open_by_executing_directly() {
    let (service, store, _) = default_service();
    store.set_unavailable(true);
    let calls = Arc::new(AtomicUsize::new(0));

    let outcome = service
        .handle(
            &request(Method::POST, "{}"),
            downstream(&calls, Ok(created()), Duration::ZERO),
        )
        .await;
    assert_eq!(
        outcome.ok().map(|outcome| outcome.disposition),
        Some(ResponseDisposition::Bypassed)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn store_outage_fails_closed_without_calling_downstream() {
    let (service, store, _) = service(StoreFailureMode::FailClosed, Duration::from_secs(5));
    store.set_unavailable(true);
    let calls = Arc::new(AtomicUsize::new(0));

    let outcome = service
        .handle(
            &request(Method::POST, "{}"),
            downstream(&calls, Ok(created()), Duration::ZERO),
        )
        .await;
    assert!(matches!(outcome, Err(AppError::Unavailable(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn outage_while_waiting_on_an_in_flight_key_never_executes_twice() {
    let (service, store, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}");

    let executor = {
        let service = service.clone();
        let request = request.clone();
        let downstream = downstream(&calls, Ok(created()), Duration::from_millis(300));
        tokio::spawn(async move { service.handle(&request, downstream).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let waiter = {
        let service = service.clone();
        let request = request.clone();
        let downstream = downstream(&calls, Ok(created()), Duration::ZERO);
        tokio::spawn(async move { service.handle(&request, downstream).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.set_unavailable(true);

    let waiter = waiter.await;
    assert!(matches!(waiter, Ok(Err(AppError::Unavailable(_)))));

    let executor = executor.await;
    assert!(matches!(
        executor,
        Ok(Ok(outcome)) if outcome.disposition == ResponseDisposition::Executed
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn any_downstream_error_releases_the_claim() {
    let (service, store, _) = default_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let request = request(Method::POST, "{}");

    let failed = service
        .handle(
            &request,
            downstream(
                &calls,
                Err(AppError::Internal("response body could not be read".to_owned())),
                Duration::ZERO,
            ),
        )
        .await;
    assert!(matches!(failed, Err(AppError::Internal(_))));
    assert_eq!(store.raw(RECORD_KEY).await, None);
}

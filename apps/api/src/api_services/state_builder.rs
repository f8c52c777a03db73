use std::sync::Arc;

use vapi_application::{
    Clock, EdgePipelineService, IdempotencyConfig, IdempotencyService, KeyValueStore,
    RateLimitConfig, RateLimitService,
};
use vapi_core::AppError;
use vapi_infrastructure::{
    HttpUpstreamForwarder, InMemoryKeyValueStore, RedisKeyValueStore, SystemClock,
};

use crate::api_config::{ApiConfig, StoreBackendConfig};
use crate::state::AppState;

use super::redis::build_redis_client;

pub fn build_app_state(config: &ApiConfig) -> Result<AppState, AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn KeyValueStore> = match &config.store_backend {
        StoreBackendConfig::InMemory => Arc::new(InMemoryKeyValueStore::new(clock.clone())),
        StoreBackendConfig::Redis { url } => {
            Arc::new(RedisKeyValueStore::new(build_redis_client(url)?))
        }
    };

    let rate_limit_service = RateLimitService::new(
        store.clone(),
        clock.clone(),
        RateLimitConfig::new(config.store_key_prefix.as_str())
            .with_failure_mode(config.rate_limit_failure_mode),
    );
    let idempotency_service = IdempotencyService::new(
        store.clone(),
        clock,
        IdempotencyConfig::new(config.store_key_prefix.as_str())
            .with_failure_mode(config.idempotency_failure_mode)
            .with_timeouts(
                config.idempotency_pending_timeout,
                config.idempotency_wait_timeout,
            ),
    );
    let forwarder = HttpUpstreamForwarder::new(
        config.upstream_url.clone(),
        config.upstream_timeout,
    )?;

    Ok(AppState {
        pipeline: EdgePipelineService::new(
            rate_limit_service,
            idempotency_service,
            config.route_policies.clone(),
        ),
        forwarder: Arc::new(forwarder),
        store,
        store_backend: config.store_backend.name(),
        credential_secret: Arc::from(config.credential_fingerprint_secret.as_str()),
        max_request_body_bytes: config.max_request_body_bytes,
    })
}

use std::future::Future;
use std::sync::Arc;

use http::Method;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vapi_core::{AppError, AppResult, CredentialId};
use vapi_domain::{BodyFingerprint, IdempotencyKey, IdempotencyRecord, ResponseSnapshot};

use super::config::IdempotencyConfig;
use super::outcome::{IdempotencyOutcome, ResponseDisposition};
use crate::{Clock, EdgeRequest, KeyValueStore, StoreFailureMode};

/// Coordinates duplicate mutating requests so downstream runs once per key.
#[derive(Clone)]
pub struct IdempotencyService {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

/// A pending record this request created or took over.
struct Claim {
    store_key: String,
    owner: String,
    record: IdempotencyRecord,
    raw: String,
}

impl IdempotencyService {
    /// Creates a new idempotency coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Runs `downstream` at most once per (credential, idempotency key).
    ///
    /// Requests with a naturally idempotent method or without a key bypass
    /// the coordinator entirely. Downstream runs on a spawned task, so the
    /// response is recorded even when the caller stops waiting. A store
    /// outage under fail-open bypasses deduplication only while no matching
    /// pending record has been seen.
    pub async fn handle<F, Fut>(
        &self,
        request: &EdgeRequest,
        downstream: F,
    ) -> AppResult<IdempotencyOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<ResponseSnapshot>> + Send + 'static,
    {
        let raw_key = match request.idempotency_key.as_deref() {
            Some(raw_key) if requires_coordination(&request.method) => raw_key,
            _ => return bypass(downstream).await,
        };

        let key = IdempotencyKey::new(raw_key)?;
        let fingerprint =
            BodyFingerprint::compute(request.method.as_str(), &request.path, &request.body);
        let store_key = self.record_key(&request.credential, &key);
        let mut downstream = Some(downstream);
        let mut seen_pending = false;

        match self
            .coordinate(store_key, &key, &fingerprint, &mut downstream, &mut seen_pending)
            .await
        {
            Err(AppError::Unavailable(detail)) => match (self.config.failure_mode, downstream) {
                (StoreFailureMode::FailOpen, Some(_)) if seen_pending => {
                    warn!(credential = %request.credential, key = key.as_str(), error = %detail, "idempotency store unavailable while the key is in flight, not executing");
                    Err(AppError::Unavailable(detail))
                }
                (StoreFailureMode::FailOpen, Some(downstream)) => {
                    warn!(credential = %request.credential, error = %detail, "idempotency store unavailable, executing without deduplication");
                    bypass(downstream).await
                }
                _ => Err(AppError::Unavailable(detail)),
            },
            result => result,
        }
    }

    async fn coordinate<F, Fut>(
        &self,
        store_key: String,
        key: &IdempotencyKey,
        fingerprint: &BodyFingerprint,
        downstream: &mut Option<F>,
        seen_pending: &mut bool,
    ) -> AppResult<IdempotencyOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<ResponseSnapshot>> + Send + 'static,
    {
        let owner = Uuid::new_v4().to_string();
        let pending_timeout_ms = duration_ms(self.config.pending_timeout);
        let wait_deadline = Instant::now() + self.config.wait_timeout;

        loop {
            let now_ms = self.clock.now_ms();
            let Some(raw) = self.store.get(&store_key).await? else {
                let record =
                    IdempotencyRecord::pending(fingerprint.clone(), &owner, now_ms, pending_timeout_ms);
                let encoded = record.encode()?;
                if self
                    .store
                    .set_if_absent(&store_key, &encoded, ttl_ms(&record, now_ms))
                    .await?
                {
                    debug!(key = key.as_str(), "claimed idempotency key");
                    let claim = Claim {
                        store_key,
                        owner,
                        record,
                        raw: encoded,
                    };
                    return self.execute(claim, downstream).await;
                }
                continue;
            };

            let record = IdempotencyRecord::decode(&raw)?;
            if !record.matches(fingerprint) {
                return Err(AppError::Conflict(format!(
                    "Idempotency-Key '{}' was already used with a different request",
                    key.as_str()
                )));
            }

            if let Some(response) = record.response() {
                debug!(key = key.as_str(), "replaying recorded response");
                return Ok(IdempotencyOutcome::new(
                    response.clone(),
                    ResponseDisposition::Replayed,
                ));
            }

            *seen_pending = true;
            if record.is_abandoned_at(now_ms) {
                let reclaimed = record.reclaim(&owner, now_ms, pending_timeout_ms)?;
                let encoded = reclaimed.encode()?;
                if self
                    .store
                    .compare_and_swap(&store_key, &raw, &encoded, ttl_ms(&reclaimed, now_ms))
                    .await?
                {
                    info!(key = key.as_str(), "took over abandoned idempotency claim");
                    let claim = Claim {
                        store_key,
                        owner,
                        record: reclaimed,
                        raw: encoded,
                    };
                    return self.execute(claim, downstream).await;
                }
                continue;
            }

            if Instant::now() >= wait_deadline {
                return Err(AppError::Conflict(format!(
                    "a request with Idempotency-Key '{}' is still being processed",
                    key.as_str()
                )));
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn execute<F, Fut>(
        &self,
        claim: Claim,
        downstream: &mut Option<F>,
    ) -> AppResult<IdempotencyOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<ResponseSnapshot>> + Send + 'static,
    {
        let Some(downstream) = downstream.take() else {
            return Err(AppError::Internal(
                "downstream handler was already consumed".to_owned(),
            ));
        };

        let service = self.clone();
        let task = tokio::spawn(async move {
            let result = downstream().await;
            service.settle(claim, result).await
        });

        task.await.map_err(|error| {
            AppError::Internal(format!("idempotent execution task failed: {error}"))
        })?
    }

    async fn settle(
        &self,
        claim: Claim,
        result: AppResult<ResponseSnapshot>,
    ) -> AppResult<IdempotencyOutcome> {
        match result {
            Ok(response) => {
                if let Err(error) = self.record_completion(&claim, &response).await {
                    warn!(error = %error, "failed to record idempotent response, retries re-execute once the claim lapses");
                }
                Ok(IdempotencyOutcome::new(
                    response,
                    ResponseDisposition::Executed,
                ))
            }
            Err(error) => {
                match self
                    .store
                    .compare_and_delete(&claim.store_key, &claim.raw)
                    .await
                {
                    Ok(true) => debug!("released idempotency claim after downstream failure"),
                    Ok(false) => warn!("idempotency claim changed before it could be released"),
                    Err(release_error) => {
                        warn!(error = %release_error, "failed to release idempotency claim");
                    }
                }
                Err(error)
            }
        }
    }

    async fn record_completion(&self, claim: &Claim, response: &ResponseSnapshot) -> AppResult<()> {
        let completed = claim.record.complete(&claim.owner, response.clone())?;
        let encoded = completed.encode()?;
        let now_ms = self.clock.now_ms();

        if !self
            .store
            .compare_and_swap(
                &claim.store_key,
                &claim.raw,
                &encoded,
                ttl_ms(&completed, now_ms),
            )
            .await?
        {
            return Err(AppError::Conflict(
                "idempotency claim was taken over before completion".to_owned(),
            ));
        }

        Ok(())
    }

    fn record_key(&self, credential: &CredentialId, key: &IdempotencyKey) -> String {
        format!(
            "{}:idem:{credential}:{}",
            self.config.key_prefix,
            key.as_str()
        )
    }
}

/// POST, PUT and PATCH are deduplicated; everything else is naturally idempotent.
fn requires_coordination(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

async fn bypass<F, Fut>(downstream: F) -> AppResult<IdempotencyOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<ResponseSnapshot>>,
{
    let response = downstream().await?;
    Ok(IdempotencyOutcome::new(
        response,
        ResponseDisposition::Bypassed,
    ))
}

fn ttl_ms(record: &IdempotencyRecord, now_ms: i64) -> u64 {
    u64::try_from(record.remaining_ttl_ms(now_ms)).unwrap_or(1)
}

fn duration_ms(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

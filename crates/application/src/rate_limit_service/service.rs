use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use vapi_core::{AppResult, CredentialId};
use vapi_domain::{CredentialBuckets, RateLimitDecision, RateLimitPolicy};

use super::config::RateLimitConfig;
use crate::{Clock, KeyValueStore, StoreFailureMode};

/// Application service for per-credential token bucket admission.
#[derive(Clone)]
pub struct RateLimitService {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimitService {
    /// Creates a new rate limit service.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Takes one token from every policy, or from none.
    ///
    /// Store failures are resolved through the configured failure mode and
    /// never surface as errors.
    pub async fn evaluate(
        &self,
        credential: &CredentialId,
        policies: &[RateLimitPolicy],
    ) -> RateLimitDecision {
        if policies.is_empty() {
            return RateLimitDecision::unrestricted();
        }

        match self.try_evaluate(credential, policies).await {
            Ok(decision) => decision,
            Err(error) => match self.config.failure_mode {
                StoreFailureMode::FailClosed => {
                    warn!(credential = %credential, error = %error, "rate limit state unavailable, rejecting request");
                    RateLimitDecision::store_unavailable(policies)
                }
                StoreFailureMode::FailOpen => {
                    warn!(credential = %credential, error = %error, "rate limit state unavailable, admitting request");
                    RateLimitDecision::unrestricted()
                }
            },
        }
    }

    /// Takes one token from every policy and propagates store failures.
    ///
    /// Losing a compare-and-swap to a concurrent writer is retried after a
    /// jittered backoff; only store errors end the loop early.
    pub async fn try_evaluate(
        &self,
        credential: &CredentialId,
        policies: &[RateLimitPolicy],
    ) -> AppResult<RateLimitDecision> {
        let key = self.bucket_key(credential);

        let mut attempt: u32 = 0;
        loop {
            let now_ms = self.clock.now_ms();
            let current = self.store.get(&key).await?;
            let mut buckets = decode_or_reset(current.as_deref(), credential);
            buckets.evict_idle(now_ms);

            let decision = buckets.admit(policies, now_ms);
            if !decision.admitted {
                debug!(credential = %credential, retry_after = decision.retry_after_seconds(), "rate limit exceeded");
                return Ok(decision);
            }

            let encoded = buckets.encode()?;
            let ttl_ms = u64::try_from(buckets.ttl_ms()).unwrap_or(u64::MAX);
            let written = match current.as_deref() {
                Some(expected) => {
                    self.store
                        .compare_and_swap(&key, expected, &encoded, ttl_ms)
                        .await?
                }
                None => self.store.set_if_absent(&key, &encoded, ttl_ms).await?,
            };

            if written {
                return Ok(decision);
            }

            attempt = attempt.saturating_add(1);
            debug!(credential = %credential, attempt, "rate limit bucket update raced, retrying");
            tokio::time::sleep(self.contention_backoff(attempt)).await;
        }
    }

    /// Reports the remaining budget of every policy without consuming tokens.
    pub async fn inspect(
        &self,
        credential: &CredentialId,
        policies: &[RateLimitPolicy],
    ) -> AppResult<RateLimitDecision> {
        let current = self.store.get(&self.bucket_key(credential)).await?;
        let buckets = decode_or_reset(current.as_deref(), credential);
        Ok(buckets.inspect(policies, self.clock.now_ms()))
    }

    fn contention_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self
            .config
            .contention_backoff
            .saturating_mul(1_u32 << attempt.min(16))
            .min(self.config.max_contention_backoff);
        jittered(ceiling)
    }

    fn bucket_key(&self, credential: &CredentialId) -> String {
        format!("{}:rl:{credential}", self.config.key_prefix)
    }
}

/// Full jitter: a uniform delay in `(0, ceiling]`.
fn jittered(ceiling: Duration) -> Duration {
    let ceiling_micros = u64::try_from(ceiling.as_micros()).unwrap_or(u64::MAX).max(1);
    let mut bytes = [0_u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        return ceiling;
    }
    Duration::from_micros(u64::from_le_bytes(bytes) % ceiling_micros + 1)
}

fn decode_or_reset(raw: Option<&str>, credential: &CredentialId) -> CredentialBuckets {
    let Some(raw) = raw else {
        return CredentialBuckets::default();
    };

    CredentialBuckets::decode(raw).unwrap_or_else(|error| {
        warn!(credential = %credential, error = %error, "discarding unreadable rate limit buckets");
        CredentialBuckets::default()
    })
}

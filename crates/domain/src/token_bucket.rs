use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vapi_core::{AppError, AppResult};

use crate::RateLimitPolicy;

/// Fixed-point scale: one whole token is this many micro-tokens.
pub const MICRO_TOKENS_PER_TOKEN: u64 = 1_000_000;

/// Grace period added to a bucket entry TTL beyond its refill window.
pub const BUCKET_TTL_GRACE_MS: i64 = 60_000;

/// Token bucket state for one (policy, credential) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    capacity: u32,
    window_seconds: u32,
    tokens_micro: u64,
    last_refill_at_ms: i64,
}

impl TokenBucket {
    /// Creates a full bucket for the policy.
    #[must_use]
    pub fn full(policy: &RateLimitPolicy, now_ms: i64) -> Self {
        Self {
            capacity: policy.capacity(),
            window_seconds: policy.window_seconds(),
            tokens_micro: u64::from(policy.capacity()) * MICRO_TOKENS_PER_TOKEN,
            last_refill_at_ms: now_ms,
        }
    }

    fn capacity_micro(&self) -> u64 {
        u64::from(self.capacity) * MICRO_TOKENS_PER_TOKEN
    }

    fn window_ms(&self) -> i64 {
        i64::from(self.window_seconds) * 1000
    }

    /// Adopts a changed policy configuration, clamping tokens to the new capacity.
    pub fn conform_to(&mut self, policy: &RateLimitPolicy) {
        self.capacity = policy.capacity();
        self.window_seconds = policy.window_seconds();
        self.tokens_micro = self.tokens_micro.min(self.capacity_micro());
    }

    /// Applies lazy refill up to `now_ms`.
    ///
    /// A clock reading older than the last refill adds nothing and keeps the
    /// newer timestamp, so instances with skewed clocks cannot mint tokens.
    pub fn refill(&mut self, now_ms: i64) {
        if now_ms <= self.last_refill_at_ms {
            return;
        }

        let elapsed_ms = u128::from(now_ms.abs_diff(self.last_refill_at_ms));
        let added = elapsed_ms * u128::from(self.capacity) * u128::from(MICRO_TOKENS_PER_TOKEN)
            / (u128::from(self.window_seconds) * 1000);
        let refilled = (u128::from(self.tokens_micro) + added).min(u128::from(self.capacity_micro()));

        self.tokens_micro = u64::try_from(refilled).unwrap_or(self.capacity_micro());
        self.last_refill_at_ms = now_ms;
    }

    /// Consumes one whole token if available.
    pub fn try_consume(&mut self) -> bool {
        if self.tokens_micro < MICRO_TOKENS_PER_TOKEN {
            return false;
        }

        self.tokens_micro -= MICRO_TOKENS_PER_TOKEN;
        true
    }

    /// Returns one previously consumed token.
    pub fn refund(&mut self) {
        self.tokens_micro = self
            .tokens_micro
            .saturating_add(MICRO_TOKENS_PER_TOKEN)
            .min(self.capacity_micro());
    }

    /// Returns the whole tokens currently available.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        u32::try_from(self.tokens_micro / MICRO_TOKENS_PER_TOKEN).unwrap_or(self.capacity)
    }

    /// Returns the current balance in micro-tokens.
    #[must_use]
    pub fn tokens_micro(&self) -> u64 {
        self.tokens_micro
    }

    /// Returns whole seconds until at least one token is available, rounded up.
    #[must_use]
    pub fn seconds_until_next_token(&self) -> u64 {
        if self.tokens_micro >= MICRO_TOKENS_PER_TOKEN {
            return 0;
        }

        let deficit = u128::from(MICRO_TOKENS_PER_TOKEN - self.tokens_micro);
        let numerator = deficit * u128::from(self.window_seconds);
        let denominator = u128::from(self.capacity_micro());
        let seconds = numerator.div_ceil(denominator);

        u64::try_from(seconds).unwrap_or(u64::from(self.window_seconds))
    }

    /// Returns whether a full window has passed since the last refill.
    ///
    /// Such a bucket is indistinguishable from a freshly created one.
    #[must_use]
    pub fn is_idle_at(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_refill_at_ms) >= self.window_ms()
    }
}

/// Per-policy accounting result reported in response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatus {
    /// Policy name.
    pub name: String,
    /// Bucket capacity (`q`).
    pub capacity: u32,
    /// Refill window in seconds (`w`).
    pub window_seconds: u32,
    /// Whole tokens left after this request (`r`).
    pub remaining: u32,
    /// Seconds until the next whole token (`t`).
    pub reset_after_seconds: u64,
    /// Whether this policy rejected the request.
    pub exhausted: bool,
    /// Whether this policy is reported in headers.
    pub emit_headers: bool,
    /// Whether a rejection by this policy carries `RateLimit` headers.
    pub rejection_headers: bool,
}

impl PolicyStatus {
    fn from_bucket(policy: &RateLimitPolicy, bucket: &TokenBucket, exhausted: bool) -> Self {
        Self {
            name: policy.name().to_owned(),
            capacity: policy.capacity(),
            window_seconds: policy.window_seconds(),
            remaining: bucket.remaining(),
            reset_after_seconds: bucket.seconds_until_next_token(),
            exhausted,
            emit_headers: policy.emit_headers(),
            rejection_headers: policy.rejection_headers(),
        }
    }
}

/// Admission outcome across every policy bound to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether every policy admitted the request.
    pub admitted: bool,
    /// Per-policy statuses in evaluation order.
    pub statuses: Vec<PolicyStatus>,
}

impl RateLimitDecision {
    /// Creates an admitted decision with no policies to report.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            admitted: true,
            statuses: Vec::new(),
        }
    }

    /// Creates a rejection used when bucket state cannot be read.
    ///
    /// Every policy reports an empty budget and a one second retry hint.
    #[must_use]
    pub fn store_unavailable(policies: &[RateLimitPolicy]) -> Self {
        Self {
            admitted: false,
            statuses: policies
                .iter()
                .map(|policy| PolicyStatus {
                    name: policy.name().to_owned(),
                    capacity: policy.capacity(),
                    window_seconds: policy.window_seconds(),
                    remaining: 0,
                    reset_after_seconds: 1,
                    exhausted: true,
                    emit_headers: policy.emit_headers(),
                    rejection_headers: policy.rejection_headers(),
                })
                .collect(),
        }
    }

    /// Seconds a rejected caller should wait before retrying.
    #[must_use]
    pub fn retry_after_seconds(&self) -> u64 {
        self.statuses
            .iter()
            .filter(|status| status.exhausted)
            .map(|status| status.reset_after_seconds)
            .max()
            .unwrap_or(0)
    }

    /// Whether `RateLimit` headers belong on this decision's response.
    ///
    /// Admissions always carry them; a rejection drops them when an
    /// exhausted policy opted out.
    #[must_use]
    pub fn carries_headers(&self) -> bool {
        self.admitted
            || self
                .statuses
                .iter()
                .filter(|status| status.exhausted)
                .all(|status| status.rejection_headers)
    }

    /// Renders the `RateLimit-Policy` header value.
    #[must_use]
    pub fn policy_header(&self) -> Option<String> {
        self.render(|status| {
            format!(
                "\"{}\";q={};w={}",
                status.name, status.capacity, status.window_seconds
            )
        })
    }

    /// Renders the `RateLimit` header value.
    #[must_use]
    pub fn limit_header(&self) -> Option<String> {
        self.render(|status| {
            format!(
                "\"{}\";r={};t={}",
                status.name, status.remaining, status.reset_after_seconds
            )
        })
    }

    fn render(&self, item: impl Fn(&PolicyStatus) -> String) -> Option<String> {
        let items: Vec<String> = self
            .statuses
            .iter()
            .filter(|status| status.emit_headers)
            .map(item)
            .collect();

        (!items.is_empty()).then(|| items.join(", "))
    }
}

/// Every bucket of one credential, persisted as a single store entry so one
/// compare-and-swap covers all of the credential's policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBuckets {
    buckets: BTreeMap<String, TokenBucket>,
}

impl CredentialBuckets {
    /// Decodes a stored entry.
    pub fn decode(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            AppError::Internal(format!("invalid stored rate limit buckets: {error}"))
        })
    }

    /// Encodes the entry for storage.
    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(|error| {
            AppError::Internal(format!("failed to encode rate limit buckets: {error}"))
        })
    }

    /// Returns the bucket for `policy`, created full on first use and refilled to `now_ms`.
    fn bucket_mut(&mut self, policy: &RateLimitPolicy, now_ms: i64) -> &mut TokenBucket {
        let bucket = self
            .buckets
            .entry(policy.name().to_owned())
            .or_insert_with(|| TokenBucket::full(policy, now_ms));
        bucket.conform_to(policy);
        bucket.refill(now_ms);
        bucket
    }

    /// Returns the stored bucket for a policy name.
    #[must_use]
    pub fn bucket(&self, policy_name: &str) -> Option<&TokenBucket> {
        self.buckets.get(policy_name)
    }

    /// Attempts to take one token from every policy.
    ///
    /// Policies are evaluated in order and evaluation stops at the first
    /// exhausted one; tokens taken from earlier policies are refunded so a
    /// rejected request never consumes budget.
    pub fn admit(&mut self, policies: &[RateLimitPolicy], now_ms: i64) -> RateLimitDecision {
        let mut statuses = Vec::with_capacity(policies.len());
        let mut rejected_at = None;

        for (index, policy) in policies.iter().enumerate() {
            let bucket = self.bucket_mut(policy, now_ms);
            if bucket.try_consume() {
                statuses.push(PolicyStatus::from_bucket(policy, bucket, false));
            } else {
                statuses.push(PolicyStatus::from_bucket(policy, bucket, true));
                rejected_at = Some(index);
                break;
            }
        }

        let Some(rejected_at) = rejected_at else {
            return RateLimitDecision {
                admitted: true,
                statuses,
            };
        };

        for (policy, status) in policies[..rejected_at].iter().zip(statuses.iter_mut()) {
            let bucket = self.bucket_mut(policy, now_ms);
            bucket.refund();
            *status = PolicyStatus::from_bucket(policy, bucket, false);
        }

        RateLimitDecision {
            admitted: false,
            statuses,
        }
    }

    /// Reports every policy's budget at `now_ms` without consuming anything.
    #[must_use]
    pub fn inspect(&self, policies: &[RateLimitPolicy], now_ms: i64) -> RateLimitDecision {
        let mut scratch = self.clone();
        let statuses = policies
            .iter()
            .map(|policy| {
                let bucket = scratch.bucket_mut(policy, now_ms);
                PolicyStatus::from_bucket(policy, bucket, false)
            })
            .collect();

        RateLimitDecision {
            admitted: true,
            statuses,
        }
    }

    /// Drops buckets that have been idle for a full window.
    pub fn evict_idle(&mut self, now_ms: i64) {
        self.buckets.retain(|_, bucket| !bucket.is_idle_at(now_ms));
    }

    /// Returns the TTL for the stored entry: the longest window plus a grace period.
    #[must_use]
    pub fn ttl_ms(&self) -> i64 {
        self.buckets
            .values()
            .map(TokenBucket::window_ms)
            .max()
            .unwrap_or(0)
            + BUCKET_TTL_GRACE_MS
    }

    /// Returns whether no bucket is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

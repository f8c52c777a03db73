//! Domain entities and invariants of the edge resilience layer.

#![forbid(unsafe_code)]

mod idempotency;
mod rate_limit;
mod token_bucket;

pub use idempotency::{
    BodyFingerprint, IDEMPOTENCY_KEY_MAX_LENGTH, IDEMPOTENCY_RECORD_TTL_MS, IdempotencyKey,
    IdempotencyRecord, IdempotencyState, ResponseSnapshot,
};
pub use rate_limit::{RateLimitPolicy, RoutePolicies, RoutePolicyBinding};
pub use token_bucket::{
    BUCKET_TTL_GRACE_MS, CredentialBuckets, MICRO_TOKENS_PER_TOKEN, PolicyStatus,
    RateLimitDecision, TokenBucket,
};

use std::time::Duration;

use crate::StoreFailureMode;

/// Runtime settings of the rate limit service.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Namespace prepended to every bucket key.
    pub key_prefix: String,
    /// Behaviour when bucket state cannot be read or written.
    pub failure_mode: StoreFailureMode,
    /// First backoff ceiling after losing a bucket update to another writer.
    pub contention_backoff: Duration,
    /// Upper bound of the jittered backoff between contended attempts.
    pub max_contention_backoff: Duration,
}

impl RateLimitConfig {
    /// Creates a config with the given key prefix and default failure handling.
    #[must_use]
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ..Self::default()
        }
    }

    /// Overrides the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, failure_mode: StoreFailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            key_prefix: "vapi".to_owned(),
            failure_mode: StoreFailureMode::FailClosed,
            contention_backoff: Duration::from_millis(1),
            max_contention_backoff: Duration::from_millis(25),
        }
    }
}

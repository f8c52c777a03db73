use std::time::Duration;

use crate::StoreFailureMode;

/// Runtime settings of the idempotency coordinator.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Namespace prepended to every record key.
    pub key_prefix: String,
    /// Behaviour when records cannot be read or written.
    pub failure_mode: StoreFailureMode,
    /// How long an executor holds a pending claim before it may be taken over.
    pub pending_timeout: Duration,
    /// How long a duplicate request waits for the executor before giving up.
    pub wait_timeout: Duration,
    /// Delay between polls of a pending record.
    pub poll_interval: Duration,
}

impl IdempotencyConfig {
    /// Creates a config with the given key prefix and default timings.
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

    /// Overrides the pending claim bound and the duplicate wait budget.
    #[must_use]
    pub fn with_timeouts(mut self, pending_timeout: Duration, wait_timeout: Duration) -> Self {
        self.pending_timeout = pending_timeout;
        self.wait_timeout = wait_timeout;
        self
    }

    /// Overrides the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_prefix: "vapi".to_owned(),
            failure_mode: StoreFailureMode::FailOpen,
            pending_timeout: Duration::from_secs(60),
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

use async_trait::async_trait;
use vapi_core::AppResult;

/// Shared key-value store with per-entry expiry and atomic conditional writes.
///
/// Every edge instance talks to the same store, so all cross-instance
/// coordination goes through these operations. Expired entries behave as absent.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the current value for `key`.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Writes `value` only when `key` is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<bool>;

    /// Replaces the value only when it still equals `expected`.
    ///
    /// The TTL is reset to `ttl_ms` on success.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl_ms: u64,
    ) -> AppResult<bool>;

    /// Writes `value` unconditionally.
    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<()>;

    /// Deletes `key` only when its value still equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> AppResult<()>;

    /// Removes expired entries and returns how many were dropped.
    ///
    /// Stores with native expiry return zero.
    async fn purge_expired(&self) -> AppResult<u64>;
}

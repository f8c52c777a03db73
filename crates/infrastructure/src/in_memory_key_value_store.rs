use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use vapi_application::{Clock, KeyValueStore};
use vapi_core::AppResult;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    expires_at_ms: i64,
}

impl StoredEntry {
    fn is_live_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// Single-process key-value store adapter.
///
/// Every conditional write runs under one write lock, which makes it atomic
/// for all tasks of this process. Expired entries are invisible immediately
/// and dropped by [`KeyValueStore::purge_expired`].
pub struct InMemoryKeyValueStore {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn entry_for(&self, value: &str, ttl_ms: u64) -> StoredEntry {
        let ttl_ms = i64::try_from(ttl_ms.max(1)).unwrap_or(i64::MAX);
        StoredEntry {
            value: value.to_owned(),
            expires_at_ms: self.clock.now_ms().saturating_add(ttl_ms),
        }
    }

    fn live_value<'a>(
        entries: &'a HashMap<String, StoredEntry>,
        key: &str,
        now_ms: i64,
    ) -> Option<&'a str> {
        entries
            .get(key)
            .filter(|entry| entry.is_live_at(now_ms))
            .map(|entry| entry.value.as_str())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries.read().await;
        Ok(Self::live_value(&entries, key, now_ms).map(str::to_owned))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<bool> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        if Self::live_value(&entries, key, now_ms).is_some() {
            return Ok(false);
        }

        entries.insert(key.to_owned(), self.entry_for(value, ttl_ms));
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl_ms: u64,
    ) -> AppResult<bool> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        if Self::live_value(&entries, key, now_ms) != Some(expected) {
            return Ok(false);
        }

        entries.insert(key.to_owned(), self.entry_for(new_value, ttl_ms));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<()> {
        let entry = self.entry_for(value, ttl_ms);
        self.entries.write().await.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        if Self::live_value(&entries, key, now_ms) != Some(expected) {
            return Ok(false);
        }

        entries.remove(key);
        Ok(true)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now_ms));

        Ok(u64::try_from(before.saturating_sub(entries.len())).unwrap_or(u64::MAX))
    }
}

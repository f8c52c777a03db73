//! Fakes shared by the service tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use vapi_core::{AppError, AppResult};

use crate::{Clock, KeyValueStore};

/// Manually advanced clock.
#[derive(Default)]
pub struct FakeClock {
    now_ms: AtomicI64,
}

impl FakeClock {
    pub fn at(now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(now_ms),
        })
    }

    pub fn advance(&self, millis: i64) {
        self.now_ms.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Map-backed store honouring TTLs against a [`FakeClock`], with an outage
/// switch and optional per-operation latency.
pub struct FakeKeyValueStore {
    clock: Arc<FakeClock>,
    entries: Mutex<HashMap<String, (String, i64)>>,
    unavailable: AtomicBool,
    latency_micros: AtomicU64,
}

impl FakeKeyValueStore {
    pub fn new(clock: Arc<FakeClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            latency_micros: AtomicU64::new(0),
        })
    }

    /// Delays every read and conditional write, as a networked store would.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::SeqCst);
    }

    async fn round_trip(&self) {
        let micros = self.latency_micros.load(Ordering::SeqCst);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|(value, _)| value.clone())
    }

    pub async fn ttl_ms(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .await
            .get(key)
            .map(|(_, expires_at)| expires_at - now)
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("fake store is down".to_owned()));
        }
        Ok(())
    }

    fn expiry(&self, ttl_ms: u64) -> i64 {
        self.clock.now_ms() + i64::try_from(ttl_ms).unwrap_or(i64::MAX / 2)
    }

    fn live<'a>(
        &self,
        entries: &'a HashMap<String, (String, i64)>,
        key: &str,
    ) -> Option<&'a String> {
        let now = self.clock.now_ms();
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value)
    }
}

#[async_trait]
impl KeyValueStore for FakeKeyValueStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.round_trip().await;
        self.ensure_available()?;
        let entries = self.entries.lock().await;
        Ok(self.live(&entries, key).cloned())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<bool> {
        self.round_trip().await;
        self.ensure_available()?;
        let mut entries = self.entries.lock().await;
        if self.live(&entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_owned(), (value.to_owned(), self.expiry(ttl_ms)));
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl_ms: u64,
    ) -> AppResult<bool> {
        self.round_trip().await;
        self.ensure_available()?;
        let mut entries = self.entries.lock().await;
        if self.live(&entries, key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), (new_value.to_owned(), self.expiry(ttl_ms)));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<()> {
        self.ensure_available()?;
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), (value.to_owned(), self.expiry(ttl_ms)));
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().await;
        if self.live(&entries, key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }

    async fn ping(&self) -> AppResult<()> {
        self.ensure_available()
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        self.ensure_available()?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(u64::try_from(before - entries.len()).unwrap_or(0))
    }
}

//! Redis-backed key-value store shared by every edge instance.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use vapi_application::KeyValueStore;
use vapi_core::{AppError, AppResult};

const COMPARE_AND_SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
else
  return 0
end
"#;

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Redis implementation of the key-value store port.
///
/// Plain writes use `SET ... PX` with `NX` where required; conditional
/// updates run as Lua scripts so the comparison and the write are atomic.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    client: redis::Client,
}

impl RedisKeyValueStore {
    /// Creates a store adapter with a configured Redis client.
    #[must_use]
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to connect to redis: {error}")))
    }
}

fn ttl_arg(ttl_ms: u64) -> u64 {
    ttl_ms.max(1)
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut connection = self.connection().await?;
        connection
            .get::<_, Option<String>>(key)
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to read redis key: {error}")))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_arg(ttl_ms))
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to create redis key: {error}"))
            })?;

        Ok(reply.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl_ms: u64,
    ) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let swapped = Script::new(COMPARE_AND_SWAP_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(new_value)
            .arg(ttl_arg(ttl_ms))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to compare-and-swap redis key: {error}"))
            })?;

        Ok(swapped > 0)
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> AppResult<()> {
        let mut connection = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_arg(ttl_ms))
            .query_async::<()>(&mut connection)
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to write redis key: {error}")))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let deleted = Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to compare-and-delete redis key: {error}"))
            })?;

        Ok(deleted > 0)
    }

    async fn ping(&self) -> AppResult<()> {
        let mut connection = self.connection().await?;
        let reply = connection
            .ping::<String>()
            .await
            .map_err(|error| AppError::Unavailable(format!("redis ping failed: {error}")))?;

        if reply.eq_ignore_ascii_case("pong") {
            Ok(())
        } else {
            Err(AppError::Unavailable(format!(
                "unexpected redis ping response: {reply}"
            )))
        }
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        // Redis expires keys natively via PX.
        Ok(0)
    }
}

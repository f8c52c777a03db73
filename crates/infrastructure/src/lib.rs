//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_upstream_forwarder;
mod in_memory_key_value_store;
mod redis_key_value_store;
mod system_clock;

pub use http_upstream_forwarder::HttpUpstreamForwarder;
pub use in_memory_key_value_store::InMemoryKeyValueStore;
pub use redis_key_value_store::RedisKeyValueStore;
pub use system_clock::SystemClock;

//! Token bucket rate limiting over the shared key-value store.
//!
//! All buckets of one credential live in a single store entry and are
//! updated with a compare-and-swap loop, so every policy bound to a request
//! is accounted atomically even with several edge instances.

mod config;
mod service;

pub use config::RateLimitConfig;
pub use service::RateLimitService;

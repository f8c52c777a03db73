//! At-most-once execution of mutating requests keyed by `Idempotency-Key`.

mod config;
mod outcome;
mod service;

pub use config::IdempotencyConfig;
pub use outcome::{IdempotencyOutcome, ResponseDisposition};
pub use service::IdempotencyService;

#[cfg(test)]
mod tests;

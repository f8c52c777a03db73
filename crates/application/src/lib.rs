//! Application services and ports of the edge resilience layer.

#![forbid(unsafe_code)]

mod edge_pipeline_service;
mod idempotency_service;
mod rate_limit_service;
mod store_ports;
mod upstream_ports;

#[cfg(test)]
mod test_support;

pub use edge_pipeline_service::{
    EdgeOutcome, EdgePipelineService, EdgeRequest, EdgeResolution, PipelineStage,
};
pub use idempotency_service::{
    IdempotencyConfig, IdempotencyOutcome, IdempotencyService, ResponseDisposition,
};
pub use rate_limit_service::{RateLimitConfig, RateLimitService};
pub use store_ports::{Clock, KeyValueStore, StoreFailureMode};
pub use upstream_ports::{UpstreamForwarder, UpstreamRequest};

//! Ordering of rate limiting and idempotency around the downstream handler.

mod outcome;
mod request;
mod service;

pub use outcome::{EdgeOutcome, EdgeResolution, PipelineStage};
pub use request::EdgeRequest;
pub use service::EdgePipelineService;

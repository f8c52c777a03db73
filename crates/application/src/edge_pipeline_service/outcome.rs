use vapi_core::AppError;
use vapi_domain::{RateLimitDecision, ResponseSnapshot};

use crate::ResponseDisposition;

/// Steps a request passes through on its way to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Request accepted by the edge.
    Received,
    /// Rate limit policies evaluated and passed.
    RateChecked,
    /// Rejected by a rate limit policy.
    Rejected,
    /// Idempotency handling finished.
    IdempotencyChecked,
    /// Response ready to send.
    Responded,
}

impl PipelineStage {
    /// Returns the stable name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RateChecked => "rate_checked",
            Self::Rejected => "rejected",
            Self::IdempotencyChecked => "idempotency_checked",
            Self::Responded => "responded",
        }
    }
}

/// Final state of a request after the pipeline ran.
#[derive(Debug)]
pub enum EdgeResolution {
    /// A rate limit policy rejected the request before anything else ran.
    Rejected,
    /// A response was produced live or replayed.
    Responded {
        /// Response to send to the client.
        response: ResponseSnapshot,
        /// How the response was obtained.
        disposition: ResponseDisposition,
    },
    /// Idempotency handling or downstream failed without a response.
    Failed(AppError),
}

/// Result of running a request through the pipeline.
#[derive(Debug)]
pub struct EdgeOutcome {
    /// Rate limit accounting, reported in headers on every resolution.
    pub decision: RateLimitDecision,
    /// What the request resolved to.
    pub resolution: EdgeResolution,
}

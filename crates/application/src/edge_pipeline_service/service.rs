use std::future::Future;

use tracing::debug;
use vapi_core::AppResult;
use vapi_domain::{ResponseSnapshot, RoutePolicies};

use super::outcome::{EdgeOutcome, EdgeResolution, PipelineStage};
use super::request::EdgeRequest;
use crate::{IdempotencyService, RateLimitService};

/// Runs rate limiting, then idempotency, then downstream.
#[derive(Clone)]
pub struct EdgePipelineService {
    rate_limit_service: RateLimitService,
    idempotency_service: IdempotencyService,
    route_policies: RoutePolicies,
}

impl EdgePipelineService {
    /// Creates a pipeline over the given services and policy set.
    #[must_use]
    pub fn new(
        rate_limit_service: RateLimitService,
        idempotency_service: IdempotencyService,
        route_policies: RoutePolicies,
    ) -> Self {
        Self {
            rate_limit_service,
            idempotency_service,
            route_policies,
        }
    }

    /// Processes one request.
    ///
    /// A rate limit rejection returns before the coordinator is consulted,
    /// so rejected requests never create idempotency records.
    pub async fn process<F, Fut>(&self, request: &EdgeRequest, downstream: F) -> EdgeOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<ResponseSnapshot>> + Send + 'static,
    {
        trace_stage(request, PipelineStage::Received);

        let policies = self.route_policies.policies_for(&request.path);
        let decision = self
            .rate_limit_service
            .evaluate(&request.credential, &policies)
            .await;

        if !decision.admitted {
            trace_stage(request, PipelineStage::Rejected);
            return EdgeOutcome {
                decision,
                resolution: EdgeResolution::Rejected,
            };
        }
        trace_stage(request, PipelineStage::RateChecked);

        let resolution = match self.idempotency_service.handle(request, downstream).await {
            Ok(outcome) => {
                debug!(
                    credential = %request.credential,
                    disposition = outcome.disposition.as_str(),
                    stage = PipelineStage::IdempotencyChecked.as_str(),
                    "request pipeline transition"
                );
                EdgeResolution::Responded {
                    response: outcome.response,
                    disposition: outcome.disposition,
                }
            }
            Err(error) => EdgeResolution::Failed(error),
        };
        trace_stage(request, PipelineStage::Responded);

        EdgeOutcome {
            decision,
            resolution,
        }
    }
}

fn trace_stage(request: &EdgeRequest, stage: PipelineStage) {
    debug!(
        credential = %request.credential,
        method = %request.method,
        path = %request.path,
        stage = stage.as_str(),
        "request pipeline transition"
    );
}

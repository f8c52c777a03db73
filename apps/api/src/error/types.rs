use serde::Serialize;
use ts_rs::TS;

/// Problem details body returned for every error response.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/problem-details.ts"
)]
pub struct ProblemDetails {
    status: u16,
    title: String,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance: Option<String>,
}

impl ProblemDetails {
    pub(super) fn new(
        status: u16,
        title: impl Into<String>,
        detail: impl Into<String>,
        instance: Option<String>,
    ) -> Self {
        Self {
            status,
            title: title.into(),
            detail: detail.into(),
            instance,
        }
    }
}

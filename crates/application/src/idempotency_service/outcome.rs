use vapi_domain::ResponseSnapshot;

/// How the coordinator produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// Dedup did not apply; downstream ran without a record.
    Bypassed,
    /// This request ran downstream and recorded the response.
    Executed,
    /// A recorded response was returned without running downstream.
    Replayed,
}

impl ResponseDisposition {
    /// Returns the stable name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bypassed => "bypassed",
            Self::Executed => "executed",
            Self::Replayed => "replayed",
        }
    }
}

/// Response produced for one request plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyOutcome {
    /// The response to send.
    pub response: ResponseSnapshot,
    /// Whether the response was live or replayed.
    pub disposition: ResponseDisposition,
}

impl IdempotencyOutcome {
    pub(super) fn new(response: ResponseSnapshot, disposition: ResponseDisposition) -> Self {
        Self {
            response,
            disposition,
        }
    }
}

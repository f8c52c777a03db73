use std::str::FromStr;

use vapi_core::AppError;

/// What a component does when the shared store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailureMode {
    /// Let the request through without the component's protection.
    FailOpen,
    /// Reject the request.
    FailClosed,
}

impl StoreFailureMode {
    /// Returns the stable configuration value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }
}

impl FromStr for StoreFailureMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail_open" | "open" => Ok(Self::FailOpen),
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            other => Err(AppError::Validation(format!(
                "unknown store failure mode '{other}', expected fail_open or fail_closed"
            ))),
        }
    }
}

//! Shared primitives for all Rust crates in the VAPI edge.

#![forbid(unsafe_code)]

/// Caller identity primitives shared across services.
pub mod auth;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::CredentialId;

/// Result type used across VAPI crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller exhausted a rate limit budget.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A shared dependency such as the key-value store cannot be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The downstream service failed without producing a response.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the human-readable detail without the category prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(detail)
            | Self::Conflict(detail)
            | Self::Unauthorized(detail)
            | Self::RateLimited(detail)
            | Self::Unavailable(detail)
            | Self::Upstream(detail)
            | Self::Internal(detail) => detail.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn detail_strips_category_prefix() {
        let error = AppError::Conflict("key reused".to_owned());
        assert_eq!(error.detail(), "key reused");
        assert_eq!(error.to_string(), "conflict: key reused");
    }
}

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AppError, AppResult};

const FINGERPRINT_HEX_LENGTH: usize = 16;

/// Stable identifier of the caller that rate limits and idempotency records are keyed on.
///
/// API keys are never stored verbatim: they are reduced to a short keyed
/// SHA-256 fingerprint before reaching any shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(String);

impl CredentialId {
    /// Derives a credential identifier from an API key and a server-side secret.
    pub fn from_api_key(secret: &str, api_key: &str) -> AppResult<Self> {
        if api_key.trim().is_empty() {
            return Err(AppError::Unauthorized("api key must not be empty".to_owned()));
        }

        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b":");
        hasher.update(api_key.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Ok(Self(format!("key:{}", &digest[..FINGERPRINT_HEX_LENGTH])))
    }

    /// Creates an identifier for anonymous callers keyed on their network address.
    pub fn from_client_address(address: &str) -> AppResult<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AppError::Validation(
                "client address must not be empty".to_owned(),
            ));
        }

        Ok(Self(format!("addr:{address}")))
    }

    /// Returns the identifier as used inside store keys.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for CredentialId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vapi_core::{AppError, AppResult};

/// Longest accepted `Idempotency-Key` header value.
pub const IDEMPOTENCY_KEY_MAX_LENGTH: usize = 255;

/// Fixed lifetime of an idempotency record, measured from creation.
pub const IDEMPOTENCY_RECORD_TTL_MS: i64 = 60 * 60 * 1000;

/// Client-supplied token grouping retries of one mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validates an idempotency key: 1 to 255 visible ASCII characters.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(AppError::Validation(
                "Idempotency-Key header must not be empty".to_owned(),
            ));
        }

        if value.len() > IDEMPOTENCY_KEY_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "Idempotency-Key header must be at most {IDEMPOTENCY_KEY_MAX_LENGTH} characters"
            )));
        }

        if !value.bytes().all(|byte| byte.is_ascii_graphic()) {
            return Err(AppError::Validation(
                "Idempotency-Key header must contain only visible ASCII characters".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// SHA-256 digest identifying the request a key was first used with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyFingerprint(String);

impl BodyFingerprint {
    /// Hashes method, path and body bytes.
    ///
    /// Binding method and path makes a key replayed against another endpoint a conflict.
    #[must_use]
    pub fn compute(method: &str, path: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(body);
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Complete captured response: status, headers in order, and body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs in response order.
    pub headers: Vec<(String, String)>,
    /// Raw body, base64-encoded when serialized.
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

impl ResponseSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdempotencyState {
    /// The owning executor is still running the downstream handler.
    Pending {
        /// Random token of the executor that holds the claim.
        owner: String,
        /// Epoch milliseconds after which the claim counts as abandoned.
        claimed_until_ms: i64,
    },
    /// The downstream handler produced a response.
    Complete {
        /// The response replayed to every retry.
        response: ResponseSnapshot,
    },
}

/// Stored deduplication state for one (credential, idempotency key) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    body_fingerprint: BodyFingerprint,
    state: IdempotencyState,
    created_at_ms: i64,
    expires_at_ms: i64,
}

impl IdempotencyRecord {
    /// Creates a pending record claimed by `owner` for `pending_timeout_ms`.
    #[must_use]
    pub fn pending(
        body_fingerprint: BodyFingerprint,
        owner: impl Into<String>,
        now_ms: i64,
        pending_timeout_ms: i64,
    ) -> Self {
        Self {
            body_fingerprint,
            state: IdempotencyState::Pending {
                owner: owner.into(),
                claimed_until_ms: now_ms.saturating_add(pending_timeout_ms),
            },
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(IDEMPOTENCY_RECORD_TTL_MS),
        }
    }

    /// Returns the fingerprint of the first request.
    #[must_use]
    pub fn body_fingerprint(&self) -> &BodyFingerprint {
        &self.body_fingerprint
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &IdempotencyState {
        &self.state
    }

    /// Returns the creation time in epoch milliseconds.
    #[must_use]
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Returns the expiry time in epoch milliseconds.
    #[must_use]
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    /// Returns the snapshot of a completed record.
    #[must_use]
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match &self.state {
            IdempotencyState::Complete { response } => Some(response),
            IdempotencyState::Pending { .. } => None,
        }
    }

    /// Returns whether `fingerprint` matches the original request.
    #[must_use]
    pub fn matches(&self, fingerprint: &BodyFingerprint) -> bool {
        self.body_fingerprint == *fingerprint
    }

    /// Returns whether a pending claim has lapsed.
    #[must_use]
    pub fn is_abandoned_at(&self, now_ms: i64) -> bool {
        match &self.state {
            IdempotencyState::Pending {
                claimed_until_ms, ..
            } => now_ms >= *claimed_until_ms,
            IdempotencyState::Complete { .. } => false,
        }
    }

    /// Completes a pending record owned by `owner`.
    pub fn complete(&self, owner: &str, response: ResponseSnapshot) -> AppResult<Self> {
        self.ensure_owned_by(owner)?;

        Ok(Self {
            state: IdempotencyState::Complete { response },
            ..self.clone()
        })
    }

    /// Transfers an abandoned pending claim to `new_owner`.
    ///
    /// Creation and expiry times are kept, so takeover never extends the record lifetime.
    pub fn reclaim(&self, new_owner: &str, now_ms: i64, pending_timeout_ms: i64) -> AppResult<Self> {
        if !self.is_abandoned_at(now_ms) {
            return Err(AppError::Conflict(
                "idempotency record is still claimed by its executor".to_owned(),
            ));
        }

        Ok(Self {
            state: IdempotencyState::Pending {
                owner: new_owner.to_owned(),
                claimed_until_ms: now_ms.saturating_add(pending_timeout_ms),
            },
            ..self.clone()
        })
    }

    fn ensure_owned_by(&self, owner: &str) -> AppResult<()> {
        match &self.state {
            IdempotencyState::Pending {
                owner: current_owner,
                ..
            } if current_owner == owner => Ok(()),
            IdempotencyState::Pending { .. } => Err(AppError::Conflict(
                "idempotency record is claimed by another executor".to_owned(),
            )),
            IdempotencyState::Complete { .. } => Err(AppError::Conflict(
                "idempotency record is already complete".to_owned(),
            )),
        }
    }

    /// Milliseconds left until expiry, never less than one.
    #[must_use]
    pub fn remaining_ttl_ms(&self, now_ms: i64) -> i64 {
        self.expires_at_ms.saturating_sub(now_ms).max(1)
    }

    /// Decodes a stored record.
    pub fn decode(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            AppError::Internal(format!("invalid stored idempotency record: {error}"))
        })
    }

    /// Encodes the record for storage.
    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(|error| {
            AppError::Internal(format!("failed to encode idempotency record: {error}"))
        })
    }
}

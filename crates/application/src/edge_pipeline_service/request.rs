use http::Method;
use vapi_core::CredentialId;

/// Transport-independent description of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRequest {
    /// Caller identity that budgets and records are keyed on.
    pub credential: CredentialId,
    /// Request method.
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    /// Raw `Idempotency-Key` header value, if present.
    pub idempotency_key: Option<String>,
    /// Fully buffered request body.
    pub body: Vec<u8>,
}

impl EdgeRequest {
    /// Creates a request without idempotency key or body.
    #[must_use]
    pub fn new(credential: CredentialId, method: Method, path: impl Into<String>) -> Self {
        Self {
            credential,
            method,
            path: path.into(),
            idempotency_key: None,
            body: Vec::new(),
        }
    }

    /// Sets the raw idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, idempotency_key: impl Into<String>) -> Self {
        self.idempotency_key = Some(idempotency_key.into());
        self
    }

    /// Sets the buffered body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

use async_trait::async_trait;
use http::Method;
use vapi_core::AppResult;
use vapi_domain::ResponseSnapshot;

/// Request handed to the protected upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    /// Request method.
    pub method: Method,
    /// Path plus optional query string, relative to the upstream base URL.
    pub path_and_query: String,
    /// End-to-end request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

/// Port for forwarding admitted requests to the upstream service.
#[async_trait]
pub trait UpstreamForwarder: Send + Sync {
    /// Forwards one request.
    ///
    /// Any upstream status, including 5xx, is a response. An error means no
    /// response was received at all.
    async fn forward(&self, request: UpstreamRequest) -> AppResult<ResponseSnapshot>;
}

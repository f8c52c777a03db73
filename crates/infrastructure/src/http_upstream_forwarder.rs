use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;
use vapi_application::{UpstreamForwarder, UpstreamRequest};
use vapi_core::{AppError, AppResult};
use vapi_domain::ResponseSnapshot;

/// Headers that describe one connection rather than the message and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP implementation for forwarding admitted requests upstream.
pub struct HttpUpstreamForwarder {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpUpstreamForwarder {
    /// Creates a forwarder for `base_url` with a per-request timeout.
    pub fn new(base_url: Url, timeout: Duration) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build upstream http client: {error}"))
            })?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn target_url(&self, path_and_query: &str) -> AppResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path_and_query = if path_and_query.starts_with('/') {
            path_and_query.to_owned()
        } else {
            format!("/{path_and_query}")
        };

        Url::parse(&format!("{base}{path_and_query}")).map_err(|error| {
            AppError::Validation(format!("invalid upstream path '{path_and_query}': {error}"))
        })
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

#[async_trait]
impl UpstreamForwarder for HttpUpstreamForwarder {
    async fn forward(&self, request: UpstreamRequest) -> AppResult<ResponseSnapshot> {
        let url = self.target_url(&request.path_and_query)?;
        debug!(method = %request.method, url = %url, "forwarding request upstream");

        let mut builder = self.http_client.request(request.method, url);
        for (name, value) in request
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
        {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|error| AppError::Upstream(format!("upstream request failed: {error}")))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(|error| {
            AppError::Upstream(format!("failed to read upstream response body: {error}"))
        })?;

        Ok(ResponseSnapshot::new(status, headers, body.to_vec()))
    }
}

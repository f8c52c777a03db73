use std::sync::Arc;

use vapi_application::{EdgePipelineService, KeyValueStore, UpstreamForwarder};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: EdgePipelineService,
    pub forwarder: Arc<dyn UpstreamForwarder>,
    pub store: Arc<dyn KeyValueStore>,
    pub store_backend: &'static str,
    pub credential_secret: Arc<str>,
    pub max_request_body_bytes: usize,
}

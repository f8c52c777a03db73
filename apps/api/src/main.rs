//! VAPI edge resilience server.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod dto;
mod error;
mod handlers;
mod middleware;
mod snapshot;
mod state;

use std::net::SocketAddr;

use tracing::info;
use vapi_core::AppError;

use crate::api_config::{ApiConfig, StoreBackendConfig};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    api_config::init_tracing();

    let config = ApiConfig::load()?;
    let app_state = api_services::build_app_state(&config)?;

    if config.store_backend == StoreBackendConfig::InMemory {
        api_services::spawn_store_purge_loop(app_state.store.clone(), config.store_purge_interval);
    }

    let app = api_router::build_router(app_state, config.cors_allowed_origin.as_deref())?;
    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(
        %address,
        upstream = %config.upstream_url,
        store = config.store_backend.name(),
        "vapi-api listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| AppError::Internal(format!("api server error: {error}")))
}

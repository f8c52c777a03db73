mod cors;

use axum::Router;
use axum::handler::Handler;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use vapi_core::AppError;

use crate::state::AppState;
use crate::{handlers, middleware};

/// Builds the edge router.
///
/// `/health` is served locally and never rate limited; every other request
/// falls through to the proxy behind the resilience middleware.
pub fn build_router(app_state: AppState, cors_allowed_origin: Option<&str>) -> Result<Router, AppError> {
    let proxy = handlers::proxy::proxy_handler.layer(from_fn_with_state(
        app_state.clone(),
        middleware::edge_resilience,
    ));

    let router = Router::new()
        .route("/health", get(handlers::health::health_handler))
        .fallback(proxy)
        .layer(TraceLayer::new_for_http());

    let router = match cors_allowed_origin {
        Some(origin) => router.layer(cors::build_cors_layer(origin)?),
        None => router,
    };

    Ok(router.with_state(app_state))
}

#[cfg(test)]
mod tests;

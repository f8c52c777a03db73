use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::dto::{HealthResponse, StoreHealthResponse};
use crate::state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.store.ping().await {
        Ok(()) => StoreHealthResponse {
            backend: state.store_backend,
            status: "ok",
            detail: None,
        },
        Err(error) => StoreHealthResponse {
            backend: state.store_backend,
            status: "error",
            detail: Some(error.detail().to_owned()),
        },
    };

    let ready = store.status == "ok";
    let http_status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "degraded" },
            store,
        }),
    )
}

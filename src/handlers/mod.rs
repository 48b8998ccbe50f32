//! Operator HTTP surface

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::models::{ErrorResponse, HealthResponse};
use crate::AppState;

pub mod data;
pub mod errors;
pub mod setup;
pub mod sync;

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sync/processes", get(sync::list_processes))
        .route("/api/sync/processes/{id}/trigger", post(sync::trigger_process))
        .route("/api/sync/processes/{id}/enabled", put(sync::set_enabled))
        .route("/api/sync/processes/{id}/interval", put(sync::set_interval))
        .route("/api/sync/runs", get(sync::list_runs))
        .route("/api/errors", get(errors::list_errors))
        .route("/api/errors/stats", get(errors::error_stats))
        .route("/api/data/{category}", get(data::read_category))
        .route("/api/setup", get(setup::get_setup).post(setup::update_setup))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let shutting_down = state.scheduler.is_shutting_down();
    Json(HealthResponse {
        status: if shutting_down { "stopping" } else { "ok" }.to_string(),
        setup_phase: state.data_access.phase(),
        running_runs: state.sync_state.running_count(),
        tenants: state.token_store.summaries(),
        shutting_down,
    })
}

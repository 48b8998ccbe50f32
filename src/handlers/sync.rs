use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::handlers::{api_error, ApiError};
use crate::models::sync::{
    ProcessOverview, RunsQuery, SetEnabledRequest, SetIntervalRequest, SyncProcessDescriptor,
    SyncRunRecord, TriggerOutcome,
};
use crate::services::scheduler::SchedulerError;
use crate::AppState;

const DEFAULT_RUNS_LIMIT: usize = 20;

fn scheduler_error(err: SchedulerError) -> ApiError {
    let status = match err {
        SchedulerError::UnknownProcess(_) => StatusCode::NOT_FOUND,
        SchedulerError::InvalidInterval => StatusCode::BAD_REQUEST,
        SchedulerError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Failed to update sync process: {}", err);
    }
    api_error(status, err.to_string())
}

pub async fn list_processes(State(state): State<AppState>) -> Json<Vec<ProcessOverview>> {
    Json(state.scheduler.processes())
}

/// POST /api/sync/processes/{id}/trigger
///
/// 202 when a run was started, 200 when one was already in flight (no-op),
/// 503 while shutting down.
pub async fn trigger_process(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<(StatusCode, Json<TriggerOutcome>), ApiError> {
    let outcome = state
        .scheduler
        .trigger_now(&process_id)
        .map_err(scheduler_error)?;

    let status = match outcome {
        TriggerOutcome::Started { .. } => StatusCode::ACCEPTED,
        TriggerOutcome::AlreadyRunning => StatusCode::OK,
        TriggerOutcome::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(outcome)))
}

pub async fn set_enabled(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> Result<Json<SyncProcessDescriptor>, ApiError> {
    state
        .scheduler
        .set_enabled(&process_id, request.enabled)
        .await
        .map(Json)
        .map_err(scheduler_error)
}

pub async fn set_interval(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
    Json(request): Json<SetIntervalRequest>,
) -> Result<Json<SyncProcessDescriptor>, ApiError> {
    state
        .scheduler
        .set_interval(&process_id, request.interval_minutes)
        .await
        .map(Json)
        .map_err(scheduler_error)
}

/// GET /api/sync/runs?process_id=&limit=
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<SyncRunRecord>>, ApiError> {
    if let Some(process_id) = &query.process_id {
        if state.scheduler.descriptor(process_id).is_none() {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("unknown sync process: {}", process_id),
            ));
        }
    }

    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    Ok(Json(
        state
            .sync_state
            .history(query.process_id.as_deref(), limit),
    ))
}

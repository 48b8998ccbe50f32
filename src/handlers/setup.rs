use axum::{extract::State, http::StatusCode, Json};

use crate::handlers::{api_error, ApiError};
use crate::models::setup::{SetupStatusUpdate, SetupStatusView};
use crate::AppState;

pub async fn get_setup(State(state): State<AppState>) -> Json<SetupStatusView> {
    Json(SetupStatusView::from(&state.data_access.setup_status()))
}

/// POST /api/setup with any subset of the two flags
pub async fn update_setup(
    State(state): State<AppState>,
    Json(update): Json<SetupStatusUpdate>,
) -> Result<Json<SetupStatusView>, ApiError> {
    match state.data_access.update_setup_status(update).await {
        Ok(status) => Ok(Json(SetupStatusView::from(&status))),
        Err(e) => {
            tracing::error!("Failed to persist setup status: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("setup status updated but not persisted: {}", e),
            ))
        }
    }
}

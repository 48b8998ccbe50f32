use axum::{
    extract::{Query, State},
    Json,
};

use crate::models::error_record::{ErrorRecord, ErrorStats, ErrorsQuery};
use crate::AppState;

const DEFAULT_ERRORS_LIMIT: usize = 50;

pub async fn error_stats(State(state): State<AppState>) -> Json<ErrorStats> {
    Json(state.error_log.stats())
}

/// Most recent errors first
pub async fn list_errors(
    State(state): State<AppState>,
    Query(query): Query<ErrorsQuery>,
) -> Json<Vec<ErrorRecord>> {
    Json(
        state
            .error_log
            .recent(query.limit.unwrap_or(DEFAULT_ERRORS_LIMIT)),
    )
}

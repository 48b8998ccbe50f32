use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::handlers::{api_error, ApiError};
use crate::models::data::{DataQuery, ReadResult};
use crate::AppState;

/// GET /api/data/{category}?tenant_id=
///
/// Storage failures are reported through the body's provenance, not the
/// status code.
pub async fn read_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Json<ReadResult>, ApiError> {
    if state.scheduler.descriptor(&category).is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("unknown category: {}", category),
        ));
    }

    let result = match query.tenant_id.as_deref() {
        Some(tenant_id) => state.data_access.read_for_tenant(&category, tenant_id).await,
        None => state.data_access.read(&category).await,
    };
    Ok(Json(result))
}

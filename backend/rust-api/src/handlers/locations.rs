use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::services::AppState;

/// GET /api/v1/locations/{location_id}
pub async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry.location(&location_id).await?))
}

/// GET /api/v1/locations/{location_id}/contest
pub async fn contest_status(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.contests.status(&location_id).await?))
}

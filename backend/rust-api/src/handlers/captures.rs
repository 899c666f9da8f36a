use axum::{extract::State, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::CaptureRequest;
use crate::services::AppState;

/// POST /api/v1/captures
///
/// Redeems a won quiz session for the location it was started on.
pub async fn attempt_capture(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<CaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .captures
        .attempt_capture(&claims.sub, &payload.session_id, &payload.position)
        .await?;
    Ok(Json(response))
}

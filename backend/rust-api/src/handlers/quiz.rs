use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::quiz::{StartQuizRequest, SubmitAnswerRequest};
use crate::services::AppState;

/// POST /api/v1/quiz-sessions
pub async fn start_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<StartQuizRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        user_id = %claims.sub,
        location_id = %payload.location_id,
        "Starting capture quiz"
    );

    let view = state
        .captures
        .begin_quiz(&claims.sub, &payload.location_id, &payload.position)
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/quiz-sessions/{session_id}
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.captures.quiz(&claims.sub, &session_id).await?))
}

/// POST /api/v1/quiz-sessions/{session_id}/answers
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(payload): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .captures
        .submit_answer(&claims.sub, &session_id, &payload.answer)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/quiz-sessions/{session_id}/abandon
pub async fn abandon_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state.captures.abandon_quiz(&claims.sub, &session_id).await?,
    ))
}

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::user::{ChangeUsernameRequest, SignInRequest};
use crate::services::AppState;

/// POST /api/v1/users
///
/// Creates the caller's profile on first sign-in; later calls return the
/// existing profile unchanged.
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.users.sign_in(&claims.sub, &payload.display_name).await?;
    Ok((StatusCode::OK, Json(profile)))
}

/// GET /api/v1/users/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.users.profile(&claims.sub).await?;
    let rank = state.leaderboard.rank_of(&claims.sub).await;
    Ok(Json(json!({
        "profile": profile,
        "rank": rank,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

/// GET /api/v1/users/name-available?name=..
pub async fn name_available(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NameQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let available = state.users.is_name_available(&query.name).await?;
    Ok(Json(json!({ "name": query.name, "available": available })))
}

/// PUT /api/v1/users/me/username
pub async fn change_username(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<ChangeUsernameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .users
        .change_username(&claims.sub, &payload.username)
        .await?;
    Ok(Json(profile))
}

/// DELETE /api/v1/users/me
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(user_id = %claims.sub, "Account deletion requested");
    Ok(Json(state.users.delete_account(&claims.sub).await?))
}

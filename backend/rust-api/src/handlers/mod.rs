use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::error::{EngineError, ErrorKind};
use crate::metrics;
use crate::services::AppState;

/// Error returned by every API handler, rendered as
/// `{ "message", "status", "code" }`.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Expired => StatusCode::GONE,
        ErrorKind::Rejected => match err {
            EngineError::NotInsideGeofence { .. } | EngineError::QuizNotWon => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(err) = self;
        let status = engine_status(&err);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?err, "Storage failure while handling request");
            "Internal storage error".to_string()
        } else {
            err.to_string()
        };
        let code = err.code();
        let json_response = json!({
            "message": message,
            "status": status.as_u16(),
            "code": code,
        });
        (status, Json(json_response)).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = state.store.backend_name();
    let probe = tokio::time::timeout(std::time::Duration::from_secs(1), state.store.health());
    let storage = match probe.await {
        Ok(Ok(())) => json!({ "status": "healthy", "backend": backend }),
        Ok(Err(e)) => json!({ "status": "unhealthy", "backend": backend, "error": e.to_string() }),
        Err(_) => json!({ "status": "unhealthy", "backend": backend, "error": "timeout after 1s" }),
    };
    let healthy = storage.get("status").and_then(|v| v.as_str()) == Some("healthy");

    let (status, status_code) = if healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "conquest-api",
            "version": env!("CARGO_PKG_VERSION"),
            "cities": state.geo.len(),
            "dependencies": { "storage": storage },
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic auth against `METRICS_AUTH` (`user:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod captures;
pub mod cities;
pub mod leaderboard;
pub mod locations;
pub mod quiz;
pub mod sse;
pub mod users;

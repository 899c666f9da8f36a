use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use tower::ServiceExt;

mod common;

use common::create_test_app;

#[tokio::test]
async fn test_health_reports_storage_backend() {
    let app = create_test_app().await;

    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "conquest-api");
    assert_eq!(body["cities"], 2);
    assert_eq!(body["dependencies"]["storage"]["backend"], "memory");
}

#[tokio::test]
async fn test_trace_id_is_echoed_or_generated() {
    let app = create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "trace-123");

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let generated = response.headers().get("x-trace-id").unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 36);
}

#[tokio::test]
async fn test_metrics_requires_basic_auth() {
    let app = create_test_app().await;

    let (status, _) = app.request("GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let credentials = general_purpose::STANDARD.encode("admin:changeme");
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header(header::AUTHORIZATION, format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"), "{}", text);
}

#[tokio::test]
async fn test_rejects_invalid_tokens() {
    let app = create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/cities")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = app.request("GET", "/api/v1/cities", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

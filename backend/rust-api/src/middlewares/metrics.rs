use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per method, normalized path and status.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Collapses path segments that carry identifiers into `{id}` to keep label
/// cardinality bounded. Segments following a known collection are always ids.
fn normalize_path(path: &str) -> String {
    let mut normalized = Vec::new();
    let mut previous = "";

    for segment in path.split('/') {
        if is_uuid_like(segment) || is_numeric_id(segment) || is_id_collection(previous) {
            normalized.push("{id}");
        } else {
            normalized.push(segment);
        }
        previous = segment;
    }

    normalized.join("/")
}

fn is_id_collection(segment: &str) -> bool {
    matches!(segment, "cities" | "locations" | "quiz-sessions" | "users")
}

fn is_uuid_like(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/quiz-sessions/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/quiz-sessions/{id}"
        );
        assert_eq!(
            normalize_path("/api/v1/quiz-sessions/123/answers"),
            "/api/v1/quiz-sessions/{id}/answers"
        );
        assert_eq!(
            normalize_path("/api/v1/cities/uppsala/locations"),
            "/api/v1/cities/{id}/locations"
        );
        assert_eq!(normalize_path("/api/v1/users/me"), "/api/v1/users/{id}");
        assert_eq!(normalize_path("/api/v1/leaderboard"), "/api/v1/leaderboard");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_is_uuid_like() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(!is_uuid_like("12345"));
    }

    #[test]
    fn test_is_numeric_id() {
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id("abc"));
        assert!(!is_numeric_id(""));
    }
}

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use conquest_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::AppState,
    store::InMemoryStore,
    utils::time::{Clock, ManualClock},
};

pub const JWT_SECRET: &str = "integration-test-secret";

/// Inside the castle geofence (50 m circle).
pub const AT_CASTLE: (f64, f64) = (59.8533, 17.6351);
/// Inside the cathedral geofence (80 m circle).
pub const AT_CATHEDRAL: (f64, f64) = (59.8581, 17.6340);
/// Inside the botanical garden polygon.
pub const AT_GARDEN: (f64, f64) = (59.8532, 17.6300);
/// A few hundred meters from every Uppsala location.
pub const FAR_AWAY: (f64, f64) = (59.8650, 17.6500);

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: ManualClock,
    jwt: JwtService,
}

pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut config = Config::in_memory(JWT_SECRET);
    config.storage.seed_path = Some(format!(
        "{}/tests/fixtures/seed.json",
        env!("CARGO_MANIFEST_DIR")
    ));

    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());

    let state = Arc::new(
        AppState::with_store(config, Arc::new(InMemoryStore::new()), dyn_clock)
            .await
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        clock,
        jwt: JwtService::new(JWT_SECRET),
    }
}

pub fn position((lat, lon): (f64, f64)) -> Value {
    json!({ "lat": lat, "lon": lon })
}

/// The fixture bank answers prompt `qN` with `aN`.
pub fn answer_for(prompt: &str) -> String {
    prompt.replacen('q', "a", 1)
}

impl TestApp {
    pub fn token(&self, user_id: &str) -> String {
        self.jwt
            .generate_token(&JwtClaims::new(user_id, None, 3600))
            .unwrap()
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        user_id: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token(user_id)),
            );
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).to_string())
            })
        };
        (status, value)
    }

    pub async fn sign_in(&self, user_id: &str, display_name: &str) -> Value {
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/users",
                Some(user_id),
                Some(json!({ "display_name": display_name })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "sign in failed: {}", body);
        body
    }

    pub async fn start_quiz(
        &self,
        user_id: &str,
        location_id: &str,
        at: (f64, f64),
    ) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/api/v1/quiz-sessions",
            Some(user_id),
            Some(json!({ "location_id": location_id, "position": position(at) })),
        )
        .await
    }

    pub async fn answer(
        &self,
        user_id: &str,
        session_id: &str,
        answer: &str,
    ) -> (StatusCode, Value) {
        self.request(
            "POST",
            &format!("/api/v1/quiz-sessions/{}/answers", session_id),
            Some(user_id),
            Some(json!({ "answer": answer })),
        )
        .await
    }

    /// Starts a quiz and answers every question correctly. Returns the
    /// session id of the won session.
    pub async fn win_quiz(&self, user_id: &str, location_id: &str, at: (f64, f64)) -> String {
        let (status, mut view) = self.start_quiz(user_id, location_id, at).await;
        assert_eq!(status, StatusCode::CREATED, "start quiz failed: {}", view);
        let session_id = view["session_id"].as_str().unwrap().to_string();

        while view["status"] == "in_progress" {
            let prompt = view["current_question"]["prompt"].as_str().unwrap();
            let (status, body) = self.answer(user_id, &session_id, &answer_for(prompt)).await;
            assert_eq!(status, StatusCode::OK, "answer failed: {}", body);
            assert_eq!(body["correct"], true);
            view = body["session"].clone();
        }
        assert_eq!(view["status"], "won", "quiz not won: {}", view);
        session_id
    }

    pub async fn capture(
        &self,
        user_id: &str,
        session_id: &str,
        at: (f64, f64),
    ) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/api/v1/captures",
            Some(user_id),
            Some(json!({ "session_id": session_id, "position": position(at) })),
        )
        .await
    }

    /// Full flow: win a quiz at `location_id` and redeem it.
    pub async fn conquer(&self, user_id: &str, location_id: &str, at: (f64, f64)) -> Value {
        let session_id = self.win_quiz(user_id, location_id, at).await;
        let (status, body) = self.capture(user_id, &session_id, at).await;
        assert_eq!(status, StatusCode::OK, "capture failed: {}", body);
        body
    }

    pub async fn location(&self, location_id: &str) -> Value {
        let (status, body) = self
            .request(
                "GET",
                &format!("/api/v1/locations/{}", location_id),
                Some("observer"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

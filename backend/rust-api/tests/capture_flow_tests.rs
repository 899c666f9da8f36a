use axum::http::StatusCode;
use serde_json::json;

mod common;

use common::{create_test_app, position, AT_CASTLE, AT_GARDEN, FAR_AWAY};

#[tokio::test]
async fn test_capture_unowned_location() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let body = app.conquer("alice", "castle", AT_CASTLE).await;

    assert_eq!(body["location"]["owner_id"], "alice");
    assert_eq!(body["previous_owner_id"], serde_json::Value::Null);
    assert_eq!(body["captured_count"], 1);

    let castle = app.location("castle").await;
    assert_eq!(castle["owner_id"], "alice");
    assert_eq!(castle["contest"], serde_json::Value::Null);

    let (status, me) = app.request("GET", "/api/v1/users/me", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["profile"]["captured_count"], 1);
    assert_eq!(me["profile"]["captured_location_ids"], json!(["castle"]));
    assert_eq!(me["rank"], 1);
}

#[tokio::test]
async fn test_capture_area_polygon() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let body = app.conquer("alice", "botanical-garden", AT_GARDEN).await;
    assert_eq!(body["location"]["owner_id"], "alice");
    assert_eq!(body["location"]["kind"], "area");
}

#[tokio::test]
async fn test_quiz_requires_presence_in_geofence() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let (status, body) = app.start_quiz("alice", "castle", FAR_AWAY).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_inside_geofence");
}

#[tokio::test]
async fn test_capture_requires_presence_at_capture_time() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let session_id = app.win_quiz("alice", "castle", AT_CASTLE).await;
    let (status, body) = app.capture("alice", &session_id, FAR_AWAY).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_inside_geofence");

    // The won session survives a rejected attempt.
    let (status, _) = app.capture("alice", &session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_owner_cannot_recapture() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;
    app.conquer("alice", "castle", AT_CASTLE).await;

    let (status, body) = app.start_quiz("alice", "castle", AT_CASTLE).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_owner");
}

#[tokio::test]
async fn test_wrong_answer_loses_quiz() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let (status, view) = app.start_quiz("alice", "castle", AT_CASTLE).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(view["status"], "in_progress");
    assert_eq!(view["required_count"], 3);
    let session_id = view["session_id"].as_str().unwrap();

    let (status, body) = app.answer("alice", session_id, "definitely wrong").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], false);
    assert_eq!(body["session"]["status"], "lost");
    assert_eq!(body["session"]["loss_reason"], "wrong_answer");

    let (status, body) = app.capture("alice", session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "session_not_found");
    assert_eq!(app.location("castle").await["owner_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_capture_before_quiz_finished_is_rejected() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let (_, view) = app.start_quiz("alice", "castle", AT_CASTLE).await;
    let session_id = view["session_id"].as_str().unwrap();

    let (status, body) = app.capture("alice", session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "quiz_not_won");
}

#[tokio::test]
async fn test_won_session_is_single_use() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let session_id = app.win_quiz("alice", "castle", AT_CASTLE).await;
    let (status, _) = app.capture("alice", &session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.capture("alice", &session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "session_not_found");
}

#[tokio::test]
async fn test_session_belongs_to_its_player() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;
    app.sign_in("bob", "Bob").await;

    let session_id = app.win_quiz("alice", "castle", AT_CASTLE).await;
    let (status, _) = app.capture("bob", &session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.location("castle").await["owner_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_capture_from_owner_within_window() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;
    app.sign_in("bob", "Bob").await;
    app.conquer("alice", "castle", AT_CASTLE).await;

    app.advance_minutes(1);
    let session_id = app.win_quiz("bob", "castle", AT_CASTLE).await;

    let castle = app.location("castle").await;
    assert_eq!(castle["contest"]["attacker_id"], "bob");
    assert_eq!(castle["contest"]["defender_id"], "alice");

    app.advance_minutes(3);
    let (status, body) = app.capture("bob", &session_id, AT_CASTLE).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["previous_owner_id"], "alice");

    let castle = app.location("castle").await;
    assert_eq!(castle["owner_id"], "bob");
    assert_eq!(castle["contest"], serde_json::Value::Null);

    let (_, alice) = app.request("GET", "/api/v1/users/me", Some("alice"), None).await;
    assert_eq!(alice["profile"]["captured_count"], 0);
    let (_, bob) = app.request("GET", "/api/v1/users/me", Some("bob"), None).await;
    assert_eq!(bob["profile"]["captured_count"], 1);
}

#[tokio::test]
async fn test_quiz_requires_signed_in_player() {
    let app = create_test_app().await;

    let (status, body) = app.start_quiz("stranger", "castle", AT_CASTLE).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "user_not_found");
}

#[tokio::test]
async fn test_unknown_location_is_not_found() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let (status, body) = app.start_quiz("alice", "atlantis", AT_CASTLE).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "location_not_found");
}

#[tokio::test]
async fn test_invalid_position_is_rejected() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/quiz-sessions",
            Some("alice"),
            Some(json!({ "location_id": "castle", "position": position((123.0, 17.0)) })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_starting_new_quiz_abandons_previous() {
    let app = create_test_app().await;
    app.sign_in("alice", "Alice").await;

    let (_, first) = app.start_quiz("alice", "castle", AT_CASTLE).await;
    let first_id = first["session_id"].as_str().unwrap();
    let (status, _) = app.start_quiz("alice", "botanical-garden", AT_GARDEN).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .request(
            "GET",
            &format!("/api/v1/quiz-sessions/{}", first_id),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_requires_token() {
    let app = create_test_app().await;

    let (status, _) = app
        .request(
            "POST",
            "/api/v1/quiz-sessions",
            None,
            Some(json!({ "location_id": "castle", "position": position(AT_CASTLE) })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

use axum::http::StatusCode;
use serde_json::Value;

mod common;

use common::{create_test_app, TestApp, AT_CASTLE, AT_CATHEDRAL, AT_GARDEN};

fn ranking(board: &Value) -> Vec<(u64, String, u64)> {
    board["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| {
            (
                e["rank"].as_u64().unwrap(),
                e["user_id"].as_str().unwrap().to_string(),
                e["captured_count"].as_u64().unwrap(),
            )
        })
        .collect()
}

async fn four_players() -> TestApp {
    let app = create_test_app().await;
    for (id, name) in [("dave", "Dave"), ("cecil", "Cecil"), ("bob", "Bob"), ("alice", "Alice")] {
        app.sign_in(id, name).await;
    }
    app
}

#[tokio::test]
async fn test_leaderboard_orders_by_count_then_user_id() {
    let app = four_players().await;
    app.conquer("cecil", "castle", AT_CASTLE).await;
    app.conquer("cecil", "cathedral", AT_CATHEDRAL).await;
    app.conquer("bob", "botanical-garden", AT_GARDEN).await;

    let (status, board) = app.request("GET", "/api/v1/leaderboard", Some("dave"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["total_users"], 4);
    assert_eq!(
        ranking(&board),
        vec![
            (1, "cecil".to_string(), 2),
            (2, "bob".to_string(), 1),
            (3, "alice".to_string(), 0),
            (4, "dave".to_string(), 0),
        ]
    );
}

#[tokio::test]
async fn test_transfer_moves_points_between_players() {
    let app = four_players().await;
    app.conquer("alice", "castle", AT_CASTLE).await;
    app.conquer("alice", "cathedral", AT_CATHEDRAL).await;

    app.advance_minutes(1);
    app.conquer("bob", "castle", AT_CASTLE).await;

    let (_, board) = app.request("GET", "/api/v1/leaderboard", Some("dave"), None).await;
    assert_eq!(
        ranking(&board)[..2],
        [(1, "alice".to_string(), 1), (2, "bob".to_string(), 1)]
    );

    let (_, me) = app.request("GET", "/api/v1/users/me", Some("bob"), None).await;
    assert_eq!(me["rank"], 2);
}

#[tokio::test]
async fn test_leaderboard_limit() {
    let app = four_players().await;
    app.conquer("dave", "castle", AT_CASTLE).await;

    let (status, board) = app
        .request("GET", "/api/v1/leaderboard?limit=2", Some("dave"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["total_users"], 4);
    assert_eq!(
        ranking(&board),
        vec![(1, "dave".to_string(), 1), (2, "alice".to_string(), 0)]
    );

    // Zero is clamped to a single entry.
    let (_, board) = app
        .request("GET", "/api/v1/leaderboard?limit=0", Some("dave"), None)
        .await;
    assert_eq!(board["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_leaderboard_matches_stored_counts() {
    let app = four_players().await;
    app.conquer("alice", "castle", AT_CASTLE).await;
    app.conquer("bob", "cathedral", AT_CATHEDRAL).await;
    app.advance_minutes(1);
    app.conquer("bob", "castle", AT_CASTLE).await;

    let (_, board) = app.request("GET", "/api/v1/leaderboard", Some("dave"), None).await;
    for (_, user_id, count) in ranking(&board) {
        let (_, me) = app
            .request("GET", "/api/v1/users/me", Some(&user_id), None)
            .await;
        assert_eq!(me["profile"]["captured_count"].as_u64().unwrap(), count, "{}", user_id);
    }
}

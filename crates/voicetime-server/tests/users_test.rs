//! Integration tests for user administration routes.

mod common;

use axum::http::StatusCode;

async fn app_with_user() -> common::TestApp {
    let app = common::build_test_app();
    common::post_json(
        &app,
        "/api/v1/voice-state",
        &common::voice_update(1, 7, None, Some(10)),
    )
    .await;
    app
}

#[tokio::test]
async fn test_edit_user_recomputes_level() {
    // Arrange
    let app = app_with_user().await;

    // Act
    let (status, json) = common::send_json(
        &app,
        "PATCH",
        "/api/v1/guilds/1/users/7",
        Some(&serde_json::json!({ "xp": 400 })),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["xp"], 400);
    assert_eq!(json["level"], 2);
}

#[tokio::test]
async fn test_blacklisted_user_leaves_the_leaderboard() {
    let app = app_with_user().await;

    let (status, json) = common::send_json(
        &app,
        "PATCH",
        "/api/v1/guilds/1/users/7",
        Some(&serde_json::json!({ "is_blacklisted": true })),
    )
    .await;
    let (_, board) = common::get_json(&app, "/api/v1/guilds/1/leaderboard?order=voice_time").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_blacklisted"], true);
    assert_eq!(json["channels"][0]["is_open"], false);
    assert_eq!(board, serde_json::json!([]));
}

#[tokio::test]
async fn test_duplicate_channel_times_are_rejected() {
    let app = app_with_user().await;

    let (status, json) = common::send_json(
        &app,
        "PATCH",
        "/api/v1/guilds/1/users/7",
        Some(&serde_json::json!({
            "channel_times": [
                { "channel_id": 10, "time_in_channel": 1000 },
                { "channel_id": 10, "time_in_channel": 2000 }
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_delete_user_then_lookup_is_not_found() {
    let app = app_with_user().await;

    let (deleted, _) = common::send_json(&app, "DELETE", "/api/v1/guilds/1/users/7", None).await;
    let (status, json) = common::get_json(&app, "/api/v1/guilds/1/users/7").await;

    assert_eq!(deleted, StatusCode::NO_CONTENT);
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "user_not_found");
}

//! API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::test_app;

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(method)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn send_empty(app: &Router, method: Method, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(method)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Create a session against a real data directory; returns its ID.
async fn create_session(app: &Router, data_dir: &std::path::Path) -> String {
    let response = send_json(
        app,
        Method::POST,
        "/sessions",
        json!({ "directories": [data_dir.to_str().unwrap()] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_temp, app) = test_app();

    let response = send_empty(&app, Method::GET, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_create_session_requires_directories() {
    let (_temp, app) = test_app();

    let response = send_json(&app, Method::POST, "/sessions", json!({ "directories": [] })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_create_session_rejects_missing_directory() {
    let (_temp, app) = test_app();

    let response = send_json(
        &app,
        Method::POST,
        "/sessions",
        json!({ "directories": ["/definitely/not/a/real/path"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_session_returns_metadata() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("recordings");
    std::fs::create_dir_all(&data_dir).unwrap();

    let response = send_json(
        &app,
        Method::POST,
        "/sessions",
        json!({ "directories": [data_dir.to_str().unwrap()] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["session_id"].is_string());
    assert_eq!(json["title"], "Conversion - recordings");
    assert!(json["work_dir"].is_string());
    assert!(json["auth_mode"].is_string());
}

#[tokio::test]
async fn test_get_live_session() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    let response = send_empty(&app, Method::GET, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["session_id"], id.as_str());
    assert_eq!(json["live"], true);
    assert!(json["connected"].is_boolean());
    assert!(json["status"].is_string());
}

#[tokio::test]
async fn test_get_unknown_session_is_404() {
    let (_temp, app) = test_app();

    let response = send_empty(&app, Method::GET, "/sessions/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_get_persisted_session_after_delete() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    // Stop the worker, keep the history
    let response = send_empty(&app, Method::DELETE, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "stopped");

    // The record is still readable
    let response = send_empty(&app, Method::GET, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["live"], false);
    assert!(json["title"].is_string());
    assert!(json["messages"].is_array());
}

#[tokio::test]
async fn test_delete_with_history_erases_record() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    let response = send_empty(
        &app,
        Method::DELETE,
        &format!("/sessions/{}?delete_history=true", id),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send_empty(&app, Method::GET, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_unknown_session_is_404() {
    let (_temp, app) = test_app();

    let response = send_empty(&app, Method::DELETE, "/sessions/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_is_idempotent_until_history_gone() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    // First delete stops the worker; history remains, so a second
    // delete still finds the session
    let response = send_empty(&app, Method::DELETE, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send_empty(&app, Method::DELETE, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Erasing the history makes further deletes 404
    let response = send_empty(
        &app,
        Method::DELETE,
        &format!("/sessions/{}?delete_history=true", id),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send_empty(&app, Method::DELETE, &format!("/sessions/{}", id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_to_unknown_session_is_404() {
    let (_temp, app) = test_app();

    let response = send_json(
        &app,
        Method::POST,
        "/sessions/nope/message",
        json!({ "content": "hello" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    let response = send_json(
        &app,
        Method::POST,
        &format!("/sessions/{}/message", id),
        json!({ "content": "   " }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_message_to_live_session_is_fire_and_forget() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    // The worker cannot connect (no engine binary), but submission
    // still succeeds; the failure surfaces on the event stream
    let response = send_json(
        &app,
        Method::POST,
        &format!("/sessions/{}/message", id),
        json!({ "content": "convert my data" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_interrupt_unknown_session_is_404() {
    let (_temp, app) = test_app();

    let response = send_empty(&app, Method::POST, "/sessions/nope/interrupt").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_interrupt_live_session() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let id = create_session(&app, &data_dir).await;

    let response = send_empty(&app, Method::POST, &format!("/sessions/{}/interrupt", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "interrupted");
}

#[tokio::test]
async fn test_events_for_unknown_session_is_404() {
    let (_temp, app) = test_app();

    let response = send_empty(&app, Method::GET, "/sessions/nope/events").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_sessions() {
    let (temp, app) = test_app();
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    create_session(&app, &data_dir).await;
    create_session(&app, &data_dir).await;

    let response = send_empty(&app, Method::GET, "/sessions").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let sessions = json["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0]["session_id"].is_string());
    assert!(sessions[0]["title"].is_string());
}

#[tokio::test]
async fn test_announce_progress() {
    let (_temp, app) = test_app();

    let response = send_json(
        &app,
        Method::POST,
        "/progress?event=conversion",
        json!({ "progress": 42, "file": "session_01.dat" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

//! HTTP surface tests: wire shapes, status codes, and a full lifecycle
//! driven through the API.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{TestApp, expect_status, json_body};

#[tokio::test]
async fn health_endpoint_answers() {
    let app = TestApp::spawn().await;
    let response = app.get(None, "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = TestApp::spawn().await;
    let response = app.post_empty(None, "/api/v1/workspaces/ws1/requests").await;
    let body = expect_status(response, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"]["kind"], "permission_denied");
}

#[tokio::test]
async fn unknown_user_is_unauthorized() {
    let app = TestApp::spawn().await;
    let response = app
        .post_empty(Some("mallory"), "/api/v1/workspaces/ws1/requests")
        .await;
    expect_status(response, StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn create_request_enforces_workspace_access() {
    let app = TestApp::spawn().await;
    // Bob is an output checker with no workspace membership.
    let response = app
        .post_empty(Some("bob"), "/api/v1/workspaces/ws1/requests")
        .await;
    let body = expect_status(response, StatusCode::FORBIDDEN).await;
    assert_eq!(body["error"]["kind"], "permission_denied");
}

#[tokio::test]
async fn duplicate_active_request_is_a_structured_error() {
    let app = TestApp::spawn().await;
    let response = app
        .post_empty(Some("alice"), "/api/v1/workspaces/ws1/requests")
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["review_turn"], 1);

    let response = app
        .post_empty(Some("alice"), "/api/v1/workspaces/ws1/requests")
        .await;
    let body = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"]["kind"], "invariant");
}

#[tokio::test]
async fn lifecycle_over_http() {
    let app = TestApp::spawn().await;
    app.write_workspace_file("ws1", "output/a.csv", b"id,count\n1,5\n")
        .await;

    // Create.
    let response = app
        .post_empty(Some("alice"), "/api/v1/workspaces/ws1/requests")
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    let id = body["id"].as_str().unwrap().to_string();

    // Add an output file.
    let response = app
        .post(
            Some("alice"),
            &format!("/api/v1/requests/{id}/files"),
            json!({
                "files": [
                    {"relpath": "output/a.csv", "filetype": "output", "group": "g1"}
                ]
            }),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["added"][0], "output/a.csv");

    // Premature submit: group incomplete.
    let response = app
        .post_empty(Some("alice"), &format!("/api/v1/requests/{id}/submit"))
        .await;
    let body = expect_status(response, StatusCode::UNPROCESSABLE_ENTITY).await;
    assert_eq!(body["error"]["kind"], "precondition");

    // Fill in the group and submit for real.
    let response = app
        .post(
            Some("alice"),
            &format!("/api/v1/requests/{id}/groups/g1/edit"),
            json!({"context": "counts", "controls": "rounded to 5"}),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["complete"], true);

    let response = app
        .post_empty(Some("alice"), &format!("/api/v1/requests/{id}/submit"))
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["status"], "submitted");

    // Bob votes and submits his review.
    let response = app
        .post(
            Some("bob"),
            &format!("/api/v1/requests/{id}/votes"),
            json!({"relpath": "output/a.csv", "choice": "approve"}),
        )
        .await;
    expect_status(response, StatusCode::OK).await;

    // Blinding: carol sees no votes on the file while review is open.
    let response = app.get(Some("carol"), &format!("/api/v1/requests/{id}")).await;
    let body = expect_status(response, StatusCode::OK).await;
    let votes = &body["groups"][0]["files"][0]["votes"];
    assert_eq!(votes.as_array().unwrap().len(), 0);

    let response = app
        .post_empty(Some("bob"), &format!("/api/v1/requests/{id}/reviews/submit"))
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["status"], "partially_reviewed");

    // Carol completes the review and releases.
    let response = app
        .post(
            Some("carol"),
            &format!("/api/v1/requests/{id}/votes"),
            json!({"relpath": "output/a.csv", "choice": "approve"}),
        )
        .await;
    expect_status(response, StatusCode::OK).await;
    let response = app
        .post_empty(Some("carol"), &format!("/api/v1/requests/{id}/reviews/submit"))
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["status"], "reviewed");

    let response = app
        .post_empty(Some("carol"), &format!("/api/v1/requests/{id}/release"))
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["status"], "approved");

    // Drive the queued uploads synchronously, then confirm release.
    while app.scheduler.drain_due().await.unwrap() > 0 {}
    let response = app.get(Some("alice"), &format!("/api/v1/requests/{id}")).await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["status"], "released");

    // The audit trail is visible to participants.
    let response = app.get(Some("alice"), &format!("/api/v1/requests/{id}/audit")).await;
    let body = expect_status(response, StatusCode::OK).await;
    assert!(body.as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn author_votes_are_rejected_with_403() {
    let app = TestApp::spawn().await;
    app.write_workspace_file("ws1", "output/a.csv", b"id\n1\n")
        .await;

    let response = app
        .post_empty(Some("alice"), "/api/v1/workspaces/ws1/requests")
        .await;
    let body = json_body(response).await;
    let id = body["id"].as_str().unwrap().to_string();

    let response = app
        .post(
            Some("alice"),
            &format!("/api/v1/requests/{id}/votes"),
            json!({"relpath": "output/a.csv", "choice": "approve"}),
        )
        .await;
    let body = expect_status(response, StatusCode::FORBIDDEN).await;
    assert_eq!(body["error"]["kind"], "permission_denied");
}

#[tokio::test]
async fn workspace_listing_requires_membership() {
    let app = TestApp::spawn().await;
    app.write_workspace_file("ws1", "output/a.csv", b"id\n1\n")
        .await;

    let response = app.get(Some("alice"), "/api/v1/workspaces/ws1/files").await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["relpath"], "output");

    let response = app.get(Some("bob"), "/api/v1/workspaces/ws1/files").await;
    expect_status(response, StatusCode::FORBIDDEN).await;

    let response = app
        .get(Some("alice"), "/api/v1/workspaces/ws1/files?path=output")
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body[0]["relpath"], "output/a.csv");
    assert_eq!(body[0]["status"], "none");
}

#[tokio::test]
async fn unknown_request_is_404() {
    let app = TestApp::spawn().await;
    let response = app
        .get(
            Some("alice"),
            "/api/v1/requests/018f3dc2-7d73-7b07-a6ff-3bd9c1f0a000",
        )
        .await;
    let body = expect_status(response, StatusCode::NOT_FOUND).await;
    assert_eq!(body["error"]["kind"], "not_found");
}

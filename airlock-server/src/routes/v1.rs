use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{comments, files, health, requests, reviews, workspaces};
use crate::infra::app_state::AppState;

/// Create all v1 API routes.
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        // Workspace browsing
        .route(
            "/workspaces/{workspace}/files",
            get(workspaces::list_workspace_files),
        )
        // Request lifecycle
        .route(
            "/workspaces/{workspace}/requests",
            post(requests::create_request),
        )
        .route("/requests/{id}", get(requests::get_request))
        .route("/requests/{id}/submit", post(requests::submit))
        .route("/requests/{id}/return", post(requests::return_request))
        .route("/requests/{id}/reject", post(requests::reject))
        .route("/requests/{id}/release", post(requests::release_files))
        .route("/requests/{id}/withdraw", post(requests::withdraw_request))
        .route("/requests/{id}/re-release", post(requests::re_release))
        .route("/requests/{id}/audit", get(requests::audit_log))
        .route("/requests/{id}/uploads", get(requests::upload_jobs))
        // Files and groups
        .route("/requests/{id}/files", post(files::add_files))
        .route("/requests/{id}/files/update", post(files::update_file))
        .route("/requests/{id}/files/withdraw", post(files::withdraw_file))
        .route(
            "/requests/{id}/files/properties",
            post(files::change_file_properties),
        )
        .route("/requests/{id}/groups/{group}/edit", post(files::edit_group))
        // Comments
        .route(
            "/requests/{id}/groups/{group}/comments",
            post(comments::create_comment),
        )
        .route("/comments/{id}/promote", post(comments::promote_comment))
        .route("/comments/{id}/delete", post(comments::delete_comment))
        // Review
        .route("/requests/{id}/votes", post(reviews::vote))
        .route("/requests/{id}/reviews/submit", post(reviews::submit_review))
}

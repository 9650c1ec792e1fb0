//! Comment handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use airlock_model::{CommentId, RequestId, Visibility};

use crate::handlers::with_deadline;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;
use crate::middleware::auth::AuthPrincipal;

#[derive(Debug, Deserialize)]
pub struct CreateCommentBody {
    pub text: String,
    pub visibility: Visibility,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: CommentId,
    pub visibility: Visibility,
    pub review_turn: i64,
}

pub async fn create_comment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((id, group)): Path<(RequestId, String)>,
    Json(body): Json<CreateCommentBody>,
) -> AppResult<Json<CommentResponse>> {
    let comment = with_deadline(
        &state,
        state
            .controller
            .create_comment(&principal, id, &group, body.text, body.visibility),
    )
    .await?;
    Ok(Json(CommentResponse {
        id: comment.id,
        visibility: comment.visibility,
        review_turn: comment.review_turn,
    }))
}

pub async fn promote_comment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<CommentId>,
) -> AppResult<Json<CommentResponse>> {
    let comment = with_deadline(&state, state.controller.promote_comment(&principal, id)).await?;
    Ok(Json(CommentResponse {
        id: comment.id,
        visibility: comment.visibility,
        review_turn: comment.review_turn,
    }))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<CommentId>,
) -> AppResult<Json<serde_json::Value>> {
    with_deadline(&state, state.controller.delete_comment(&principal, id)).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

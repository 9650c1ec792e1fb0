//! Voting and review submission handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use airlock_model::{RelPath, RequestId, RequestStatus, VoteChoice};

use crate::handlers::with_deadline;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;
use crate::middleware::auth::AuthPrincipal;

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub relpath: RelPath,
    pub choice: VoteChoice,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub relpath: RelPath,
    pub choice: VoteChoice,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewSubmittedResponse {
    pub id: RequestId,
    pub status: RequestStatus,
}

pub async fn vote(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
    Json(body): Json<VoteBody>,
) -> AppResult<Json<VoteResponse>> {
    with_deadline(
        &state,
        state
            .controller
            .vote(&principal, id, &body.relpath, body.choice),
    )
    .await?;
    Ok(Json(VoteResponse {
        relpath: body.relpath,
        choice: body.choice,
    }))
}

pub async fn submit_review(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<ReviewSubmittedResponse>> {
    let status = with_deadline(&state, state.controller.submit_review(&principal, id)).await?;
    Ok(Json(ReviewSubmittedResponse { id, status }))
}

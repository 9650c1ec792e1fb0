//! Request lifecycle handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use airlock_core::view::RequestView;
use airlock_model::{AuditEntry, RequestId, RequestStatus, UploadJob};

use crate::handlers::with_deadline;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;
use crate::middleware::auth::AuthPrincipal;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: RequestId,
    pub status: RequestStatus,
    pub review_turn: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: RequestId,
    pub status: RequestStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReturnBody {
    /// The UI's "are you sure" confirmation travels with the call.
    pub confirm: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReReleaseResponse {
    pub id: RequestId,
    pub requeued_jobs: u64,
}

pub async fn create_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(workspace): Path<String>,
) -> AppResult<Json<CreatedResponse>> {
    let request = with_deadline(&state, state.controller.create_request(&principal, &workspace))
        .await?;
    Ok(Json(CreatedResponse {
        id: request.id,
        status: request.status,
        review_turn: request.review_turn,
    }))
}

pub async fn get_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<RequestView>> {
    let view = with_deadline(&state, state.controller.request_view(&principal, id)).await?;
    Ok(Json(view))
}

pub async fn submit(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<StatusResponse>> {
    let status = with_deadline(&state, state.controller.submit(&principal, id)).await?;
    Ok(Json(StatusResponse { id, status }))
}

pub async fn return_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
    Json(body): Json<ReturnBody>,
) -> AppResult<Json<StatusResponse>> {
    let status = with_deadline(
        &state,
        state.controller.return_request(&principal, id, body.confirm),
    )
    .await?;
    Ok(Json(StatusResponse { id, status }))
}

pub async fn reject(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<StatusResponse>> {
    let status = with_deadline(&state, state.controller.reject(&principal, id)).await?;
    Ok(Json(StatusResponse { id, status }))
}

pub async fn release_files(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<StatusResponse>> {
    let status = with_deadline(&state, state.controller.release_files(&principal, id)).await?;
    Ok(Json(StatusResponse { id, status }))
}

pub async fn withdraw_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<StatusResponse>> {
    let status = with_deadline(&state, state.controller.withdraw_request(&principal, id)).await?;
    Ok(Json(StatusResponse { id, status }))
}

pub async fn re_release(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<ReReleaseResponse>> {
    let requeued = with_deadline(&state, state.controller.re_release(&principal, id)).await?;
    Ok(Json(ReReleaseResponse {
        id,
        requeued_jobs: requeued,
    }))
}

pub async fn audit_log(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    let entries = with_deadline(&state, state.controller.audit_log(&principal, id)).await?;
    Ok(Json(entries))
}

pub async fn upload_jobs(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
) -> AppResult<Json<Vec<UploadJob>>> {
    let jobs = with_deadline(&state, state.controller.upload_jobs(&principal, id)).await?;
    Ok(Json(jobs))
}

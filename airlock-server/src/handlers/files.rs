//! File and group handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use airlock_core::controller::{AddFileSpec, FilePropertyChange};
use airlock_model::{FileType, RelPath, RequestId};

use crate::handlers::with_deadline;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;
use crate::middleware::auth::AuthPrincipal;

#[derive(Debug, Deserialize)]
pub struct AddFilesBody {
    pub files: Vec<AddFileEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AddFileEntry {
    pub relpath: RelPath,
    pub filetype: FileType,
    pub group: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddFilesResponse {
    pub added: Vec<RelPath>,
}

#[derive(Debug, Deserialize)]
pub struct FilePathBody {
    pub relpath: RelPath,
}

#[derive(Debug, Deserialize)]
pub struct FilePropertiesBody {
    pub relpath: RelPath,
    pub filetype: Option<FileType>,
    pub group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditGroupBody {
    pub context: Option<String>,
    pub controls: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupResponse {
    pub name: String,
    pub context: String,
    pub controls: String,
    pub complete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub relpath: RelPath,
    pub filetype: FileType,
    pub content_hash: String,
    pub size: i64,
}

pub async fn add_files(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
    Json(body): Json<AddFilesBody>,
) -> AppResult<Json<AddFilesResponse>> {
    let specs = body
        .files
        .into_iter()
        .map(|entry| AddFileSpec {
            relpath: entry.relpath,
            filetype: entry.filetype,
            group: entry.group,
        })
        .collect();
    let added = with_deadline(&state, state.controller.add_files(&principal, id, specs)).await?;
    Ok(Json(AddFilesResponse {
        added: added.into_iter().map(|f| f.relpath).collect(),
    }))
}

pub async fn update_file(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
    Json(body): Json<FilePathBody>,
) -> AppResult<Json<FileResponse>> {
    let file = with_deadline(
        &state,
        state.controller.update_file(&principal, id, &body.relpath),
    )
    .await?;
    Ok(Json(FileResponse {
        relpath: file.relpath,
        filetype: file.filetype,
        content_hash: file.content_hash,
        size: file.size,
    }))
}

pub async fn withdraw_file(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
    Json(body): Json<FilePathBody>,
) -> AppResult<Json<serde_json::Value>> {
    with_deadline(
        &state,
        state.controller.withdraw_file(&principal, id, &body.relpath),
    )
    .await?;
    Ok(Json(serde_json::json!({ "withdrawn": body.relpath })))
}

pub async fn change_file_properties(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<RequestId>,
    Json(body): Json<FilePropertiesBody>,
) -> AppResult<Json<FileResponse>> {
    let change = FilePropertyChange {
        filetype: body.filetype,
        group: body.group,
    };
    let file = with_deadline(
        &state,
        state
            .controller
            .change_file_properties(&principal, id, &body.relpath, change),
    )
    .await?;
    Ok(Json(FileResponse {
        relpath: file.relpath,
        filetype: file.filetype,
        content_hash: file.content_hash,
        size: file.size,
    }))
}

pub async fn edit_group(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((id, group)): Path<(RequestId, String)>,
    Json(body): Json<EditGroupBody>,
) -> AppResult<Json<GroupResponse>> {
    let group = with_deadline(
        &state,
        state
            .controller
            .edit_group(&principal, id, &group, body.context, body.controls),
    )
    .await?;
    Ok(Json(GroupResponse {
        complete: group.is_complete(),
        name: group.name,
        context: group.context,
        controls: group.controls,
    }))
}

//! Workspace browsing handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use airlock_model::{RelPath, WorkspaceFileMeta};

use crate::handlers::with_deadline;
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;
use crate::middleware::auth::AuthPrincipal;

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub path: Option<RelPath>,
}

pub async fn list_workspace_files(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(workspace): Path<String>,
    Query(query): Query<ListingQuery>,
) -> AppResult<Json<Vec<WorkspaceFileMeta>>> {
    let listing = with_deadline(
        &state,
        state
            .controller
            .workspace_listing(&principal, &workspace, query.path.as_ref()),
    )
    .await?;
    Ok(Json(listing))
}

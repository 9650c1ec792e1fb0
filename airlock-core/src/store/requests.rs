//! Repository functions for release requests.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use airlock_model::{ReleaseRequest, RequestId, RequestStatus};

use crate::error::{AirlockError, Result};
use crate::store::map_db_err;

fn map_row(row: &SqliteRow) -> Result<ReleaseRequest> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let status: String = row.try_get("status").map_err(map_db_err)?;
    Ok(ReleaseRequest {
        id: id.parse()?,
        workspace: row.try_get("workspace").map_err(map_db_err)?,
        author: row.try_get("author").map_err(map_db_err)?,
        status: status.parse()?,
        review_turn: row.try_get("review_turn").map_err(map_db_err)?,
        jobs_release_id: row.try_get("jobs_release_id").map_err(map_db_err)?,
        jobs_release_url: row.try_get("jobs_release_url").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        updated_at: row.try_get("updated_at").map_err(map_db_err)?,
    })
}

const COLUMNS: &str = "id, workspace, author, status, review_turn, \
                       jobs_release_id, jobs_release_url, created_at, updated_at";

pub async fn insert(conn: &mut SqliteConnection, request: &ReleaseRequest) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO requests
            (id, workspace, author, status, review_turn,
             jobs_release_id, jobs_release_url, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(request.id.to_string())
    .bind(&request.workspace)
    .bind(&request.author)
    .bind(request.status.as_str())
    .bind(request.review_turn)
    .bind(&request.jobs_release_id)
    .bind(&request.jobs_release_url)
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn fetch(conn: &mut SqliteConnection, id: RequestId) -> Result<Option<ReleaseRequest>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM requests WHERE id = ?1"))
        .bind(id.to_string())
        .fetch_optional(conn)
        .await
        .map_err(map_db_err)?;
    row.as_ref().map(map_row).transpose()
}

/// Fetch, failing with `NotFound` when the request does not exist.
pub async fn get(conn: &mut SqliteConnection, id: RequestId) -> Result<ReleaseRequest> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| AirlockError::NotFound(format!("request {id}")))
}

/// The author's single live request in a workspace, if any (invariant U1).
pub async fn active_for(
    conn: &mut SqliteConnection,
    workspace: &str,
    author: &str,
) -> Result<Option<ReleaseRequest>> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM requests \
         WHERE workspace = ?1 AND author = ?2 \
           AND status NOT IN ('released', 'rejected', 'withdrawn')"
    ))
    .bind(workspace)
    .bind(author)
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref().map(map_row).transpose()
}

pub async fn update_status(
    conn: &mut SqliteConnection,
    id: RequestId,
    status: RequestStatus,
    review_turn: i64,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE requests SET status = ?2, review_turn = ?3, updated_at = ?4 WHERE id = ?1",
    )
    .bind(id.to_string())
    .bind(status.as_str())
    .bind(review_turn)
    .bind(updated_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    if result.rows_affected() == 0 {
        return Err(AirlockError::NotFound(format!("request {id}")));
    }
    Ok(())
}

/// Record the external release handle returned by the Jobs site. Only the
/// first writer wins; a concurrent creation attempt observes the handle it
/// lost to and uses that instead.
pub async fn set_release_handle(
    conn: &mut SqliteConnection,
    id: RequestId,
    release_id: &str,
    release_url: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE requests SET jobs_release_id = ?2, jobs_release_url = ?3, updated_at = ?4 \
         WHERE id = ?1 AND jobs_release_url IS NULL",
    )
    .bind(id.to_string())
    .bind(release_id)
    .bind(release_url)
    .bind(Utc::now())
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(result.rows_affected() > 0)
}

/// All requests in a workspace, newest first (admin listing).
pub async fn list_for_workspace(
    conn: &mut SqliteConnection,
    workspace: &str,
) -> Result<Vec<ReleaseRequest>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM requests WHERE workspace = ?1 ORDER BY created_at DESC"
    ))
    .bind(workspace)
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_row).collect()
}

pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<ReleaseRequest>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM requests ORDER BY created_at DESC"
    ))
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_row).collect()
}

/// Relpaths that went out in earlier RELEASED requests for this workspace;
/// drives the `Released` workspace-view status.
pub async fn released_relpaths(
    conn: &mut SqliteConnection,
    workspace: &str,
) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT DISTINCT f.relpath FROM request_files f \
         JOIN requests r ON r.id = f.request_id \
         WHERE r.workspace = ?1 AND r.status = 'released' AND f.withdrawn_at IS NULL",
    )
    .bind(workspace)
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter()
        .map(|row| row.try_get("relpath").map_err(map_db_err))
        .collect()
}

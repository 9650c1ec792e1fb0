//! Repository functions for group comments.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use airlock_model::{Comment, CommentId, RequestId, Visibility};

use crate::error::{AirlockError, Result};
use crate::store::map_db_err;

fn map_comment(row: &SqliteRow) -> Result<Comment> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    let group_id: String = row.try_get("group_id").map_err(map_db_err)?;
    let visibility: String = row.try_get("visibility").map_err(map_db_err)?;
    Ok(Comment {
        id: id.parse()?,
        request_id: request_id.parse()?,
        group_id: group_id.parse()?,
        author: row.try_get("author").map_err(map_db_err)?,
        body: row.try_get("body").map_err(map_db_err)?,
        visibility: visibility.parse()?,
        review_turn: row.try_get("review_turn").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

const COLUMNS: &str = "id, request_id, group_id, author, body, visibility, review_turn, created_at";

pub async fn insert(conn: &mut SqliteConnection, comment: &Comment) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO comments ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    ))
    .bind(comment.id.to_string())
    .bind(comment.request_id.to_string())
    .bind(comment.group_id.to_string())
    .bind(&comment.author)
    .bind(&comment.body)
    .bind(comment.visibility.as_str())
    .bind(comment.review_turn)
    .bind(comment.created_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, id: CommentId) -> Result<Comment> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM comments WHERE id = ?1"))
        .bind(id.to_string())
        .fetch_optional(conn)
        .await
        .map_err(map_db_err)?;
    row.as_ref()
        .map(map_comment)
        .transpose()?
        .ok_or_else(|| AirlockError::NotFound(format!("comment {id}")))
}

pub async fn list_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<Comment>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM comments WHERE request_id = ?1 ORDER BY created_at"
    ))
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_comment).collect()
}

pub async fn set_visibility(
    conn: &mut SqliteConnection,
    id: CommentId,
    visibility: Visibility,
) -> Result<()> {
    sqlx::query("UPDATE comments SET visibility = ?2 WHERE id = ?1")
        .bind(id.to_string())
        .bind(visibility.as_str())
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: CommentId) -> Result<()> {
    sqlx::query("DELETE FROM comments WHERE id = ?1")
        .bind(id.to_string())
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

//! Repository functions for file groups and request files.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use airlock_model::{FileGroup, FileId, FileType, GroupId, RelPath, RequestFile, RequestId};

use crate::error::{AirlockError, Result};
use crate::store::map_db_err;

fn map_group(row: &SqliteRow) -> Result<FileGroup> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    Ok(FileGroup {
        id: id.parse()?,
        request_id: request_id.parse()?,
        name: row.try_get("name").map_err(map_db_err)?,
        context: row.try_get("context").map_err(map_db_err)?,
        controls: row.try_get("controls").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

fn map_file(row: &SqliteRow) -> Result<RequestFile> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    let group_id: String = row.try_get("group_id").map_err(map_db_err)?;
    let relpath: String = row.try_get("relpath").map_err(map_db_err)?;
    let filetype: String = row.try_get("filetype").map_err(map_db_err)?;
    Ok(RequestFile {
        id: id.parse()?,
        request_id: request_id.parse()?,
        group_id: group_id.parse()?,
        relpath: RelPath::new(relpath)?,
        filetype: filetype.parse()?,
        content_hash: row.try_get("content_hash").map_err(map_db_err)?,
        size: row.try_get("size").map_err(map_db_err)?,
        added_at: row.try_get("added_at").map_err(map_db_err)?,
        added_by: row.try_get("added_by").map_err(map_db_err)?,
        added_in_turn: row.try_get("added_in_turn").map_err(map_db_err)?,
        withdrawn_at: row.try_get("withdrawn_at").map_err(map_db_err)?,
        withdrawn_in_turn: row.try_get("withdrawn_in_turn").map_err(map_db_err)?,
        uploaded_at: row.try_get("uploaded_at").map_err(map_db_err)?,
    })
}

const FILE_COLUMNS: &str = "id, request_id, group_id, relpath, filetype, content_hash, size, \
                            added_at, added_by, added_in_turn, withdrawn_at, withdrawn_in_turn, \
                            uploaded_at";

pub async fn insert_group(conn: &mut SqliteConnection, group: &FileGroup) -> Result<()> {
    sqlx::query(
        "INSERT INTO file_groups (id, request_id, name, context, controls, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(group.id.to_string())
    .bind(group.request_id.to_string())
    .bind(&group.name)
    .bind(&group.context)
    .bind(&group.controls)
    .bind(group.created_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn group_by_name(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    name: &str,
) -> Result<Option<FileGroup>> {
    let row = sqlx::query(
        "SELECT id, request_id, name, context, controls, created_at \
         FROM file_groups WHERE request_id = ?1 AND name = ?2",
    )
    .bind(request_id.to_string())
    .bind(name)
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref().map(map_group).transpose()
}

pub async fn get_group(conn: &mut SqliteConnection, id: GroupId) -> Result<FileGroup> {
    let row = sqlx::query(
        "SELECT id, request_id, name, context, controls, created_at \
         FROM file_groups WHERE id = ?1",
    )
    .bind(id.to_string())
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref()
        .map(map_group)
        .transpose()?
        .ok_or_else(|| AirlockError::NotFound(format!("file group {id}")))
}

pub async fn groups_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<FileGroup>> {
    let rows = sqlx::query(
        "SELECT id, request_id, name, context, controls, created_at \
         FROM file_groups WHERE request_id = ?1 ORDER BY created_at, name",
    )
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_group).collect()
}

pub async fn update_group_text(
    conn: &mut SqliteConnection,
    id: GroupId,
    context: &str,
    controls: &str,
) -> Result<()> {
    sqlx::query("UPDATE file_groups SET context = ?2, controls = ?3 WHERE id = ?1")
        .bind(id.to_string())
        .bind(context)
        .bind(controls)
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

pub async fn insert_file(conn: &mut SqliteConnection, file: &RequestFile) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO request_files ({FILE_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
    ))
    .bind(file.id.to_string())
    .bind(file.request_id.to_string())
    .bind(file.group_id.to_string())
    .bind(file.relpath.as_str())
    .bind(file.filetype.as_str())
    .bind(&file.content_hash)
    .bind(file.size)
    .bind(file.added_at)
    .bind(file.added_by.as_str())
    .bind(file.added_in_turn)
    .bind(file.withdrawn_at)
    .bind(file.withdrawn_in_turn)
    .bind(file.uploaded_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn files_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<RequestFile>> {
    let rows = sqlx::query(&format!(
        "SELECT {FILE_COLUMNS} FROM request_files WHERE request_id = ?1 ORDER BY relpath"
    ))
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_file).collect()
}

pub async fn get_file(conn: &mut SqliteConnection, id: FileId) -> Result<RequestFile> {
    let row = sqlx::query(&format!(
        "SELECT {FILE_COLUMNS} FROM request_files WHERE id = ?1"
    ))
    .bind(id.to_string())
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref()
        .map(map_file)
        .transpose()?
        .ok_or_else(|| AirlockError::NotFound(format!("request file {id}")))
}

/// The active (non-withdrawn) file at a relpath, if present.
pub async fn active_by_relpath(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    relpath: &RelPath,
) -> Result<Option<RequestFile>> {
    let row = sqlx::query(&format!(
        "SELECT {FILE_COLUMNS} FROM request_files \
         WHERE request_id = ?1 AND relpath = ?2 AND withdrawn_at IS NULL"
    ))
    .bind(request_id.to_string())
    .bind(relpath.as_str())
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref().map(map_file).transpose()
}

/// Replace a file's snapshot after the workspace copy changed.
pub async fn update_snapshot(
    conn: &mut SqliteConnection,
    id: FileId,
    content_hash: &str,
    size: i64,
    added_by: &str,
    added_in_turn: i64,
    added_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE request_files \
         SET content_hash = ?2, size = ?3, added_by = ?4, added_in_turn = ?5, added_at = ?6, \
             uploaded_at = NULL \
         WHERE id = ?1",
    )
    .bind(id.to_string())
    .bind(content_hash)
    .bind(size)
    .bind(added_by)
    .bind(added_in_turn)
    .bind(added_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn update_properties(
    conn: &mut SqliteConnection,
    id: FileId,
    filetype: FileType,
    group_id: GroupId,
) -> Result<()> {
    sqlx::query("UPDATE request_files SET filetype = ?2, group_id = ?3 WHERE id = ?1")
        .bind(id.to_string())
        .bind(filetype.as_str())
        .bind(group_id.to_string())
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

/// Hard-delete a file row (withdraw while the request is still PENDING).
pub async fn delete_file(conn: &mut SqliteConnection, id: FileId) -> Result<()> {
    sqlx::query("DELETE FROM request_files WHERE id = ?1")
        .bind(id.to_string())
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

/// Tombstone a file row (withdraw in RETURNED keeps history).
pub async fn mark_withdrawn(
    conn: &mut SqliteConnection,
    id: FileId,
    at: DateTime<Utc>,
    in_turn: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE request_files SET withdrawn_at = ?2, withdrawn_in_turn = ?3 WHERE id = ?1",
    )
    .bind(id.to_string())
    .bind(at)
    .bind(in_turn)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn set_uploaded(
    conn: &mut SqliteConnection,
    id: FileId,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE request_files SET uploaded_at = ?2 WHERE id = ?1 AND uploaded_at IS NULL")
        .bind(id.to_string())
        .bind(at)
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

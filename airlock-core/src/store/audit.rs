//! Append-only audit log persistence.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use airlock_model::{AuditEntry, RequestId};

use crate::error::Result;
use crate::store::map_db_err;

fn map_entry(row: &SqliteRow) -> Result<AuditEntry> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    let kind: String = row.try_get("kind").map_err(map_db_err)?;
    let extras: String = row.try_get("extras").map_err(map_db_err)?;
    Ok(AuditEntry {
        id: Uuid::parse_str(&id)
            .map_err(|_| airlock_model::ModelError::InvalidId(id.clone()))?,
        request_id: request_id.parse()?,
        actor: row.try_get("actor").map_err(map_db_err)?,
        kind: kind.parse()?,
        path: row.try_get("path").map_err(map_db_err)?,
        extras: serde_json::from_str(&extras)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

/// Append one entry; there is no update or delete path on this table.
pub async fn append(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit_log (id, request_id, actor, kind, path, extras, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(entry.id.to_string())
    .bind(entry.request_id.to_string())
    .bind(&entry.actor)
    .bind(entry.kind.as_str())
    .bind(&entry.path)
    .bind(serde_json::to_string(&entry.extras)?)
    .bind(entry.created_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn list_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT id, request_id, actor, kind, path, extras, created_at \
         FROM audit_log WHERE request_id = ?1 ORDER BY created_at, id",
    )
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_entry).collect()
}

//! Transactional event outbox.
//!
//! Lifecycle events are inserted in the same transaction as the state
//! change that caused them, then drained to the configured sink by the
//! dispatcher task. Delivery is at-least-once: a row is only marked
//! dispatched after the sink accepts it.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use airlock_model::LifecycleEvent;

use crate::error::Result;
use crate::store::map_db_err;

fn map_event(row: &SqliteRow) -> Result<LifecycleEvent> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let kind: String = row.try_get("kind").map_err(map_db_err)?;
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    Ok(LifecycleEvent {
        id: Uuid::parse_str(&id)
            .map_err(|_| airlock_model::ModelError::InvalidId(id.clone()))?,
        kind: kind.parse()?,
        request_id: request_id.parse()?,
        workspace: row.try_get("workspace").map_err(map_db_err)?,
        author: row.try_get("author").map_err(map_db_err)?,
        actor: row.try_get("actor").map_err(map_db_err)?,
        review_turn: row.try_get("review_turn").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

pub async fn enqueue(conn: &mut SqliteConnection, event: &LifecycleEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO outbox_events \
             (id, kind, request_id, workspace, author, actor, review_turn, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(event.id.to_string())
    .bind(event.kind.as_str())
    .bind(event.request_id.to_string())
    .bind(&event.workspace)
    .bind(&event.author)
    .bind(&event.actor)
    .bind(event.review_turn)
    .bind(event.created_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn fetch_undispatched(
    conn: &mut SqliteConnection,
    limit: i64,
) -> Result<Vec<LifecycleEvent>> {
    let rows = sqlx::query(
        "SELECT id, kind, request_id, workspace, author, actor, review_turn, created_at \
         FROM outbox_events WHERE dispatched_at IS NULL ORDER BY created_at LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_event).collect()
}

pub async fn mark_dispatched(
    conn: &mut SqliteConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE outbox_events SET dispatched_at = ?2 WHERE id = ?1")
        .bind(id.to_string())
        .bind(at)
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

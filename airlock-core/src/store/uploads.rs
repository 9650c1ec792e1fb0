//! Persistent upload job queue.
//!
//! Jobs are claimed by flipping `queued -> in_flight` in a single UPDATE so
//! at most one worker ever holds a given (request, relpath) upload. Crash
//! recovery demotes stale `in_flight` rows back to `queued` at startup.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use airlock_model::{JobState, RelPath, RequestId, UploadJob, UploadJobId};

use crate::error::Result;
use crate::store::map_db_err;

fn map_job(row: &SqliteRow) -> Result<UploadJob> {
    let id: String = row.try_get("id").map_err(map_db_err)?;
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    let file_id: String = row.try_get("file_id").map_err(map_db_err)?;
    let relpath: String = row.try_get("relpath").map_err(map_db_err)?;
    let state: String = row.try_get("state").map_err(map_db_err)?;
    Ok(UploadJob {
        id: id.parse()?,
        request_id: request_id.parse()?,
        file_id: file_id.parse()?,
        relpath: RelPath::new(relpath)?,
        content_hash: row.try_get("content_hash").map_err(map_db_err)?,
        state: state.parse()?,
        attempts: row.try_get("attempts").map_err(map_db_err)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(map_db_err)?,
        deadline_at: row.try_get("deadline_at").map_err(map_db_err)?,
        last_error: row.try_get("last_error").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        updated_at: row.try_get("updated_at").map_err(map_db_err)?,
    })
}

const COLUMNS: &str = "id, request_id, file_id, relpath, content_hash, state, attempts, \
                       next_attempt_at, deadline_at, last_error, created_at, updated_at";

/// Enqueue a job; a second enqueue for the same (request, file) is ignored,
/// keeping scheduling idempotent across re-releases.
pub async fn enqueue(conn: &mut SqliteConnection, job: &UploadJob) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO upload_jobs ({COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT (request_id, file_id) DO NOTHING"
    ))
    .bind(job.id.to_string())
    .bind(job.request_id.to_string())
    .bind(job.file_id.to_string())
    .bind(job.relpath.as_str())
    .bind(&job.content_hash)
    .bind(job.state.as_str())
    .bind(job.attempts)
    .bind(job.next_attempt_at)
    .bind(job.deadline_at)
    .bind(&job.last_error)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

/// Atomically claim the next due job, if any.
pub async fn claim_next_due(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Option<UploadJob>> {
    let row = sqlx::query(&format!(
        "UPDATE upload_jobs SET state = 'in_flight', updated_at = ?1 \
         WHERE id = ( \
             SELECT id FROM upload_jobs \
             WHERE state = 'queued' AND next_attempt_at <= ?1 \
             ORDER BY next_attempt_at LIMIT 1 \
         ) \
         RETURNING {COLUMNS}"
    ))
    .bind(now)
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref().map(map_job).transpose()
}

pub async fn mark_succeeded(
    conn: &mut SqliteConnection,
    id: UploadJobId,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE upload_jobs SET state = 'succeeded', last_error = NULL, updated_at = ?2 \
         WHERE id = ?1",
    )
    .bind(id.to_string())
    .bind(now)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn mark_failed(
    conn: &mut SqliteConnection,
    id: UploadJobId,
    error: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE upload_jobs SET state = 'failed', last_error = ?2, updated_at = ?3 WHERE id = ?1",
    )
    .bind(id.to_string())
    .bind(error)
    .bind(now)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

/// Put a transiently failed job back in the queue with its backoff applied.
pub async fn reschedule(
    conn: &mut SqliteConnection,
    id: UploadJobId,
    attempts: i64,
    next_attempt_at: DateTime<Utc>,
    error: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE upload_jobs \
         SET state = 'queued', attempts = ?2, next_attempt_at = ?3, last_error = ?4, \
             updated_at = ?5 \
         WHERE id = ?1",
    )
    .bind(id.to_string())
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(error)
    .bind(now)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

/// Re-queue FAILED jobs for a request with attempts reset (the `re-release`
/// operation). Returns how many jobs were revived.
pub async fn requeue_failed(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    deadline_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE upload_jobs \
         SET state = 'queued', attempts = 0, next_attempt_at = ?3, deadline_at = ?2, \
             last_error = NULL, updated_at = ?3 \
         WHERE request_id = ?1 AND state = 'failed'",
    )
    .bind(request_id.to_string())
    .bind(deadline_at)
    .bind(now)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(result.rows_affected())
}

/// Startup recovery: anything left `in_flight` by a crashed process goes
/// back to `queued` so the scheduler picks it up again.
pub async fn requeue_stale_in_flight(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE upload_jobs SET state = 'queued', next_attempt_at = ?1, updated_at = ?1 \
         WHERE state = 'in_flight'",
    )
    .bind(now)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(result.rows_affected())
}

pub async fn list_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<UploadJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM upload_jobs WHERE request_id = ?1 ORDER BY relpath"
    ))
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_job).collect()
}

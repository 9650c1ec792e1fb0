//! Repository functions for votes and review submissions.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use airlock_model::{FileId, RequestId, ReviewSubmission, Vote};

use crate::error::Result;
use crate::store::map_db_err;

fn map_vote(row: &SqliteRow) -> Result<Vote> {
    let file_id: String = row.try_get("file_id").map_err(map_db_err)?;
    let choice: String = row.try_get("choice").map_err(map_db_err)?;
    Ok(Vote {
        file_id: file_id.parse()?,
        reviewer: row.try_get("reviewer").map_err(map_db_err)?,
        review_turn: row.try_get("review_turn").map_err(map_db_err)?,
        choice: choice.parse()?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

fn map_submission(row: &SqliteRow) -> Result<ReviewSubmission> {
    let request_id: String = row.try_get("request_id").map_err(map_db_err)?;
    Ok(ReviewSubmission {
        request_id: request_id.parse()?,
        reviewer: row.try_get("reviewer").map_err(map_db_err)?,
        review_turn: row.try_get("review_turn").map_err(map_db_err)?,
        submitted_at: row.try_get("submitted_at").map_err(map_db_err)?,
    })
}

/// Upsert keyed by (file, reviewer, turn); repeat votes overwrite in place.
pub async fn upsert_vote(conn: &mut SqliteConnection, vote: &Vote) -> Result<()> {
    sqlx::query(
        "INSERT INTO votes (file_id, reviewer, review_turn, choice, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (file_id, reviewer, review_turn) \
         DO UPDATE SET choice = excluded.choice, created_at = excluded.created_at",
    )
    .bind(vote.file_id.to_string())
    .bind(&vote.reviewer)
    .bind(vote.review_turn)
    .bind(vote.choice.as_str())
    .bind(vote.created_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn fetch_vote(
    conn: &mut SqliteConnection,
    file_id: FileId,
    reviewer: &str,
    review_turn: i64,
) -> Result<Option<Vote>> {
    let row = sqlx::query(
        "SELECT file_id, reviewer, review_turn, choice, created_at FROM votes \
         WHERE file_id = ?1 AND reviewer = ?2 AND review_turn = ?3",
    )
    .bind(file_id.to_string())
    .bind(reviewer)
    .bind(review_turn)
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    row.as_ref().map(map_vote).transpose()
}

/// All votes across all turns for a request's files.
pub async fn votes_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<Vote>> {
    let rows = sqlx::query(
        "SELECT v.file_id, v.reviewer, v.review_turn, v.choice, v.created_at \
         FROM votes v JOIN request_files f ON f.id = v.file_id \
         WHERE f.request_id = ?1 ORDER BY v.created_at",
    )
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_vote).collect()
}

/// Drop every vote on a file; used when its snapshot is replaced and the
/// old votes no longer apply.
pub async fn delete_votes_for_file(conn: &mut SqliteConnection, file_id: FileId) -> Result<()> {
    sqlx::query("DELETE FROM votes WHERE file_id = ?1")
        .bind(file_id.to_string())
        .execute(conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

pub async fn insert_submission(
    conn: &mut SqliteConnection,
    submission: &ReviewSubmission,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO review_submissions (request_id, reviewer, review_turn, submitted_at) \
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(submission.request_id.to_string())
    .bind(&submission.reviewer)
    .bind(submission.review_turn)
    .bind(submission.submitted_at)
    .execute(conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub async fn submissions_for_request(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<Vec<ReviewSubmission>> {
    let rows = sqlx::query(
        "SELECT request_id, reviewer, review_turn, submitted_at \
         FROM review_submissions WHERE request_id = ?1 ORDER BY submitted_at",
    )
    .bind(request_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(map_db_err)?;
    rows.iter().map(map_submission).collect()
}

pub async fn has_submitted(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    reviewer: &str,
    review_turn: i64,
) -> Result<bool> {
    let row = sqlx::query(
        "SELECT 1 AS present FROM review_submissions \
         WHERE request_id = ?1 AND reviewer = ?2 AND review_turn = ?3",
    )
    .bind(request_id.to_string())
    .bind(reviewer)
    .bind(review_turn)
    .fetch_optional(conn)
    .await
    .map_err(map_db_err)?;
    Ok(row.is_some())
}

/// Distinct reviewers who submitted in the given turn.
pub async fn submitted_reviewer_count(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    review_turn: i64,
) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(DISTINCT reviewer) AS n FROM review_submissions \
         WHERE request_id = ?1 AND review_turn = ?2",
    )
    .bind(request_id.to_string())
    .bind(review_turn)
    .fetch_one(conn)
    .await
    .map_err(map_db_err)?;
    row.try_get("n").map_err(map_db_err)
}

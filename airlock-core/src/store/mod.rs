//! SQLite-backed persistence for the request lifecycle.
//!
//! Repository functions take a `&mut SqliteConnection` so the controller can
//! compose several of them inside one transaction; [`Store`] owns the pool
//! and hands out transactions. SQLite's single-writer model serializes
//! conflicting writes per database, which covers the per-request ordering
//! guarantee; busy/locked errors surface as `Conflict` so callers retry with
//! fresh state.

pub mod audit;
pub mod comments;
pub mod files;
pub mod outbox;
pub mod requests;
pub mod reviews;
pub mod uploads;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};

use crate::error::{AirlockError, Result};

/// Embedded schema migrations, applied on startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the request store; cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) a store at the given filesystem path and
    /// bring the schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        Self::connect_with(options).await
    }

    /// Connect using a `sqlite:` URL (used by the server's `DATABASE_URL`).
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(AirlockError::Database)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(map_db_err)?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| AirlockError::Database(e.into()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a write transaction. Every mutating controller operation runs
    /// entirely inside one of these, audit and outbox writes included.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(map_db_err)
    }
}

/// Translate low-level sqlx failures into the engine's error surface:
/// unique-index violations are invariant breaches, lock contention is a
/// retryable conflict.
pub(crate) fn map_db_err(err: sqlx::Error) -> AirlockError {
    if let sqlx::Error::Database(db) = &err {
        if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
            return AirlockError::Invariant(format!("uniqueness violation: {}", db.message()));
        }
        let message = db.message();
        if message.contains("database is locked") || message.contains("database table is locked") {
            return AirlockError::Conflict(
                "concurrent modification; refresh and retry".to_string(),
            );
        }
    }
    AirlockError::Database(err)
}

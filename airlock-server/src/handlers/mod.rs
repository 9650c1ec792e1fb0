//! HTTP handlers, grouped by area.
//!
//! Every mutating handler funnels its controller call through
//! [`with_deadline`], which enforces the configured per-operation deadline
//! and maps expiry to the `timeout` error kind.

pub mod comments;
pub mod files;
pub mod health;
pub mod requests;
pub mod reviews;
pub mod workspaces;

use std::future::Future;

use airlock_core::AirlockError;

use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// Run a controller operation under the server's request deadline.
pub async fn with_deadline<T, F>(state: &AppState, operation: F) -> AppResult<T>
where
    F: Future<Output = airlock_core::Result<T>>,
{
    match tokio::time::timeout(state.config.request_timeout(), operation).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::from(AirlockError::Timeout(
            "operation exceeded the request deadline".to_string(),
        ))),
    }
}

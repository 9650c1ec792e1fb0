//! # Airlock Server
//!
//! HTTP surface for the Airlock release-request service.
//!
//! ## Overview
//!
//! Airlock runs inside a secure analytics enclave and mediates the egress of
//! workspace files to the external Jobs site:
//!
//! - **Release requests**: researchers assemble requests from workspace
//!   files, grouped with context and controls descriptions.
//! - **Independent review**: two output checkers vote file by file, blinded
//!   from each other until both submit.
//! - **Reliable release**: approved files upload asynchronously with
//!   retries; the request is RELEASED only when every output landed.
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - SQLite (via sqlx) for the request store and upload queue
//! - A content-addressed snapshot store for file bytes
//! - A background scheduler for uploads and an outbox dispatcher for events

/// Versioned route organization
pub mod routes;

/// Request handlers by area
pub mod handlers;

/// Middleware implementations
pub mod middleware;

/// Server infrastructure: config, state, errors, startup
pub mod infra;

pub use infra::app_state::AppState;
pub use infra::config::Config;
pub use infra::errors::{AppError, AppResult};

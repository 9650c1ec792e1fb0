//! # Airlock Core
//!
//! The release-request lifecycle engine for the Airlock egress service.
//!
//! ## Overview
//!
//! Airlock mediates the movement of analytic outputs from an enclave
//! workspace to an external Jobs site. This crate implements:
//!
//! - **Request store**: SQLite-backed persistence for requests, file groups,
//!   files, votes, comments, the audit log, upload jobs, and the event
//!   outbox.
//! - **State machine**: the authoritative transition table for request
//!   statuses and turn ownership.
//! - **Review engine**: per-file vote aggregation, decision derivation,
//!   independent-review blinding, and the submit/return/release gates.
//! - **Request controller**: the public operations (create, add files,
//!   vote, submit, return, release, ...) with capability checks, one
//!   transaction per operation, audit entries, and lifecycle events.
//! - **Upload scheduler**: a persistent job queue that pushes released
//!   files to the external Jobs API with bounded concurrency, retries with
//!   jittered backoff, and crash-safe resumption.
//!
//! The HTTP surface lives in `airlock-server`; administrative tooling in
//! `airlockctl`.

pub mod controller;
pub mod error;
pub mod events;
pub mod identity;
pub mod machine;
pub mod review;
pub mod snapshots;
pub mod store;
pub mod upload;
pub mod view;
pub mod workspace;

pub use controller::RequestController;
pub use error::{AirlockError, ErrorKind, Result};
pub use events::{EventSink, OutboxDispatcher, TracingEventSink};
pub use identity::Principal;
pub use snapshots::SnapshotStore;
pub use store::Store;
pub use upload::{JobsApi, UploadConfig, UploadScheduler};
pub use workspace::WorkspaceView;

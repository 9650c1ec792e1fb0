//! Read-only projection of workspace files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::relpath::RelPath;

/// Where a workspace path stands relative to the author's current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// The same path was released by an earlier request.
    Released,
    /// On the current request, but the workspace copy has changed since the
    /// snapshot was taken.
    Updated,
    /// On the current request with a matching snapshot.
    UnderReview,
    /// Not part of the current request.
    None,
}

/// Metadata for one entry in a workspace directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceFileMeta {
    pub relpath: RelPath,
    pub is_dir: bool,
    pub size: i64,
    pub modified_at: Option<DateTime<Utc>>,
    /// sha256 hex of the current workspace bytes; absent for directories.
    pub content_hash: Option<String>,
    pub status: PathStatus,
}

//! Entity records for requests, groups, files, votes, and comments.
//!
//! These are plain data carriers; all invariants (uniqueness, transition
//! legality, vote blinding) are enforced by the store and controller in
//! `airlock-core`. Parent links are held as ids, never as back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CommentId, FileId, GroupId, RequestId, UploadJobId};
use crate::relpath::RelPath;
use crate::status::{FileType, JobState, RequestStatus, Visibility, VoteChoice};

/// A release request: the root aggregate of the egress workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub id: RequestId,
    pub workspace: String,
    pub author: String,
    pub status: RequestStatus,
    /// Monotonically increasing; bumped on every transition that flips
    /// ownership between author and reviewers.
    pub review_turn: i64,
    /// External release handle, set once the Jobs site accepts the release.
    pub jobs_release_id: Option<String>,
    pub jobs_release_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReleaseRequest {
    pub fn new(workspace: impl Into<String>, author: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            workspace: workspace.into(),
            author: author.into(),
            status: RequestStatus::Pending,
            review_turn: 1,
            jobs_release_id: None,
            jobs_release_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A named collection of files sharing one context/controls description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileGroup {
    pub id: GroupId,
    pub request_id: RequestId,
    pub name: String,
    pub context: String,
    pub controls: String,
    pub created_at: DateTime<Utc>,
}

impl FileGroup {
    /// A group is complete once both narrative fields are filled in; output
    /// files cannot leave the author's hands inside an incomplete group.
    pub fn is_complete(&self) -> bool {
        !self.context.trim().is_empty() && !self.controls.trim().is_empty()
    }
}

/// A file attached to a request. The content hash is a snapshot taken at
/// add/update time; later workspace edits do not affect it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFile {
    pub id: FileId,
    pub request_id: RequestId,
    pub group_id: GroupId,
    pub relpath: RelPath,
    pub filetype: FileType,
    pub content_hash: String,
    pub size: i64,
    pub added_at: DateTime<Utc>,
    pub added_by: String,
    pub added_in_turn: i64,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub withdrawn_in_turn: Option<i64>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl RequestFile {
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn_at.is_some()
    }

    /// Active output files are the ones reviews and uploads care about.
    pub fn is_active_output(&self) -> bool {
        !self.is_withdrawn() && self.filetype == FileType::Output
    }
}

/// One reviewer's vote on one file in one review turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub file_id: FileId,
    pub reviewer: String,
    pub review_turn: i64,
    pub choice: VoteChoice,
    pub created_at: DateTime<Utc>,
}

/// Marks that a reviewer submitted their review for a turn; votes become
/// visible to other reviewers only through this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub request_id: RequestId,
    pub reviewer: String,
    pub review_turn: i64,
    pub submitted_at: DateTime<Utc>,
}

/// A comment on a file group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub request_id: RequestId,
    pub group_id: GroupId,
    pub author: String,
    pub body: String,
    pub visibility: Visibility,
    pub review_turn: i64,
    pub created_at: DateTime<Utc>,
}

/// A persistent upload job driving one file to the external Jobs site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: UploadJobId,
    pub request_id: RequestId,
    pub file_id: FileId,
    pub relpath: RelPath,
    pub content_hash: String,
    pub state: JobState,
    pub attempts: i64,
    pub next_attempt_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_completeness_ignores_whitespace() {
        let mut group = FileGroup {
            id: GroupId::new(),
            request_id: RequestId::new(),
            name: "g1".to_string(),
            context: "  ".to_string(),
            controls: "rounded".to_string(),
            created_at: Utc::now(),
        };
        assert!(!group.is_complete());
        group.context = "counts".to_string();
        assert!(group.is_complete());
    }

    #[test]
    fn new_request_starts_pending_at_turn_one() {
        let request = ReleaseRequest::new("ws", "alice");
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.review_turn, 1);
        assert!(request.jobs_release_url.is_none());
    }
}

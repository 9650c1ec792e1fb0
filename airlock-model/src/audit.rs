//! Append-only audit trail entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::ids::RequestId;

/// What a mutating operation did; one audit entry per controller operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    RequestCreated,
    RequestSubmitted,
    RequestResubmitted,
    RequestReturned,
    RequestRejected,
    RequestApproved,
    RequestReleased,
    RequestWithdrawn,
    FileAdded,
    FileUpdated,
    FileWithdrawn,
    FilePropertiesChanged,
    GroupEdited,
    CommentCreated,
    CommentPromoted,
    CommentDeleted,
    VoteCast,
    ReviewSubmitted,
    UploadSucceeded,
    UploadFailed,
    UploadsRequeued,
}

impl AuditKind {
    pub const ALL: &'static [AuditKind] = &[
        AuditKind::RequestCreated,
        AuditKind::RequestSubmitted,
        AuditKind::RequestResubmitted,
        AuditKind::RequestReturned,
        AuditKind::RequestRejected,
        AuditKind::RequestApproved,
        AuditKind::RequestReleased,
        AuditKind::RequestWithdrawn,
        AuditKind::FileAdded,
        AuditKind::FileUpdated,
        AuditKind::FileWithdrawn,
        AuditKind::FilePropertiesChanged,
        AuditKind::GroupEdited,
        AuditKind::CommentCreated,
        AuditKind::CommentPromoted,
        AuditKind::CommentDeleted,
        AuditKind::VoteCast,
        AuditKind::ReviewSubmitted,
        AuditKind::UploadSucceeded,
        AuditKind::UploadFailed,
        AuditKind::UploadsRequeued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::RequestCreated => "request_created",
            AuditKind::RequestSubmitted => "request_submitted",
            AuditKind::RequestResubmitted => "request_resubmitted",
            AuditKind::RequestReturned => "request_returned",
            AuditKind::RequestRejected => "request_rejected",
            AuditKind::RequestApproved => "request_approved",
            AuditKind::RequestReleased => "request_released",
            AuditKind::RequestWithdrawn => "request_withdrawn",
            AuditKind::FileAdded => "file_added",
            AuditKind::FileUpdated => "file_updated",
            AuditKind::FileWithdrawn => "file_withdrawn",
            AuditKind::FilePropertiesChanged => "file_properties_changed",
            AuditKind::GroupEdited => "group_edited",
            AuditKind::CommentCreated => "comment_created",
            AuditKind::CommentPromoted => "comment_promoted",
            AuditKind::CommentDeleted => "comment_deleted",
            AuditKind::VoteCast => "vote_cast",
            AuditKind::ReviewSubmitted => "review_submitted",
            AuditKind::UploadSucceeded => "upload_succeeded",
            AuditKind::UploadFailed => "upload_failed",
            AuditKind::UploadsRequeued => "uploads_requeued",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::InvalidValue(format!("unknown audit kind: {s}")))
    }
}

/// A single append-only audit record. `extras` carries operation-specific
/// detail (group names, vote choices, upstream status codes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub request_id: RequestId,
    pub actor: String,
    pub kind: AuditKind,
    pub path: Option<String>,
    pub extras: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(request_id: RequestId, actor: impl Into<String>, kind: AuditKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id,
            actor: actor.into(),
            kind,
            path: None,
            extras: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.extras {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_extras() {
        let entry = AuditEntry::new(RequestId::new(), "alice", AuditKind::VoteCast)
            .with_path("output/a.csv")
            .with_extra("choice", "approve")
            .with_extra("turn", 2);
        assert_eq!(entry.path.as_deref(), Some("output/a.csv"));
        assert_eq!(entry.extras["choice"], "approve");
        assert_eq!(entry.extras["turn"], 2);
    }
}

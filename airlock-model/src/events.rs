//! Lifecycle events emitted by the request controller and upload scheduler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::ids::RequestId;

/// The set of externally visible lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submitted,
    ReviewSubmitted,
    Returned,
    Resubmitted,
    Rejected,
    Withdrawn,
    Approved,
    Released,
    UploadFailed,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        EventKind::Submitted,
        EventKind::ReviewSubmitted,
        EventKind::Returned,
        EventKind::Resubmitted,
        EventKind::Rejected,
        EventKind::Withdrawn,
        EventKind::Approved,
        EventKind::Released,
        EventKind::UploadFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Submitted => "submitted",
            EventKind::ReviewSubmitted => "review_submitted",
            EventKind::Returned => "returned",
            EventKind::Resubmitted => "resubmitted",
            EventKind::Rejected => "rejected",
            EventKind::Withdrawn => "withdrawn",
            EventKind::Approved => "approved",
            EventKind::Released => "released",
            EventKind::UploadFailed => "upload_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::InvalidValue(format!("unknown event kind: {s}")))
    }
}

/// Envelope delivered to event sinks. Delivery is at-least-once and
/// best-effort; sinks must tolerate duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub request_id: RequestId,
    pub workspace: String,
    pub author: String,
    pub actor: String,
    pub review_turn: i64,
    pub created_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        kind: EventKind,
        request_id: RequestId,
        workspace: impl Into<String>,
        author: impl Into<String>,
        actor: impl Into<String>,
        review_turn: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            request_id,
            workspace: workspace.into(),
            author: author.into(),
            actor: actor.into(),
            review_turn,
            created_at: Utc::now(),
        }
    }
}

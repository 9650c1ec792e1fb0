//! Core data model definitions shared across Airlock crates.
#![allow(missing_docs)]

pub mod audit;
pub mod error;
pub mod events;
pub mod ids;
pub mod relpath;
pub mod request;
pub mod status;
pub mod workspace;

// Intentionally curated re-exports for downstream consumers.
pub use audit::{AuditEntry, AuditKind};
pub use error::{ModelError, Result as ModelResult};
pub use events::{EventKind, LifecycleEvent};
pub use ids::{CommentId, FileId, GroupId, RequestId, UploadJobId};
pub use relpath::RelPath;
pub use request::{
    Comment, FileGroup, ReleaseRequest, RequestFile, ReviewSubmission, UploadJob, Vote,
};
pub use status::{
    FileDecision, FileType, JobState, RequestStatus, TurnOwner, Visibility, VoteChoice,
};
pub use workspace::{PathStatus, WorkspaceFileMeta};

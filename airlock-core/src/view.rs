//! Per-principal projections of a request.
//!
//! Votes, comments, and decisions pass through the review engine's
//! visibility predicates before they reach a caller; the raw entity tables
//! are never serialized directly. One build function assembles the whole
//! tree so every read path applies identical blinding.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use airlock_model::{
    Comment, CommentId, FileDecision, FileGroup, FileId, FileType, GroupId, RelPath,
    ReleaseRequest, RequestFile, RequestId, RequestStatus, ReviewSubmission, Visibility, Vote,
    VoteChoice,
};

use crate::identity::Principal;
use crate::review;

/// A request as one principal is allowed to see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestView {
    pub id: RequestId,
    pub workspace: String,
    pub author: String,
    pub status: RequestStatus,
    pub review_turn: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub groups: Vec<GroupView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupView {
    pub id: GroupId,
    pub name: String,
    pub context: String,
    pub controls: String,
    pub complete: bool,
    pub files: Vec<FileView>,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileView {
    pub id: FileId,
    pub relpath: RelPath,
    pub filetype: FileType,
    pub content_hash: String,
    pub size: i64,
    pub added_in_turn: i64,
    pub withdrawn: bool,
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Aggregated outcome; populated only once decisions are visible.
    pub decision: Option<FileDecision>,
    /// Individual votes, filtered by the blinding rules.
    pub votes: Vec<VoteView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteView {
    pub reviewer: String,
    pub choice: VoteChoice,
    pub review_turn: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentView {
    pub id: CommentId,
    pub author: String,
    pub body: String,
    pub visibility: Visibility,
    pub review_turn: i64,
    pub created_at: DateTime<Utc>,
}

/// Assemble the blinded view of a request for one principal.
pub fn build(
    viewer: &Principal,
    request: &ReleaseRequest,
    groups: &[FileGroup],
    files: &[RequestFile],
    votes: &[Vote],
    submissions: &[ReviewSubmission],
    comments: &[Comment],
) -> RequestView {
    let decisions: HashMap<FileId, FileDecision> = if review::decisions_visible(request.status) {
        review::file_decisions(files, votes, submissions)
    } else {
        HashMap::new()
    };

    let group_views = groups
        .iter()
        .map(|group| {
            let file_views = files
                .iter()
                .filter(|f| f.group_id == group.id)
                .map(|file| {
                    let visible_votes = votes
                        .iter()
                        .filter(|v| {
                            v.file_id == file.id && review::vote_visible(v, viewer, request)
                        })
                        .map(|v| VoteView {
                            reviewer: v.reviewer.clone(),
                            choice: v.choice,
                            review_turn: v.review_turn,
                        })
                        .collect();
                    FileView {
                        id: file.id,
                        relpath: file.relpath.clone(),
                        filetype: file.filetype,
                        content_hash: file.content_hash.clone(),
                        size: file.size,
                        added_in_turn: file.added_in_turn,
                        withdrawn: file.is_withdrawn(),
                        uploaded_at: file.uploaded_at,
                        decision: decisions.get(&file.id).copied(),
                        votes: visible_votes,
                    }
                })
                .collect();

            let comment_views = comments
                .iter()
                .filter(|c| {
                    c.group_id == group.id && review::comment_visible(c, viewer, request)
                })
                .map(|c| CommentView {
                    id: c.id,
                    author: c.author.clone(),
                    body: c.body.clone(),
                    visibility: c.visibility,
                    review_turn: c.review_turn,
                    created_at: c.created_at,
                })
                .collect();

            GroupView {
                id: group.id,
                name: group.name.clone(),
                context: group.context.clone(),
                controls: group.controls.clone(),
                complete: group.is_complete(),
                files: file_views,
                comments: comment_views,
            }
        })
        .collect();

    RequestView {
        id: request.id,
        workspace: request.workspace.clone(),
        author: request.author.clone(),
        status: request.status,
        review_turn: request.review_turn,
        created_at: request.created_at,
        updated_at: request.updated_at,
        groups: group_views,
    }
}

//! The request controller: every public mutating operation of the service.
//!
//! Each operation follows the same shape: resolve capability, open one
//! transaction, re-check status preconditions against fresh rows, apply the
//! entity writes plus an audit entry plus any outbox event, commit, then
//! nudge the background tasks. Nothing mutates request state outside this
//! module and the upload scheduler.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::info;

use airlock_model::{
    AuditEntry, AuditKind, Comment, CommentId, EventKind, FileGroup, FileType, JobState,
    LifecycleEvent, RelPath, ReleaseRequest, RequestFile, RequestId, RequestStatus, ReviewSubmission,
    UploadJob, UploadJobId, Visibility, Vote, VoteChoice, WorkspaceFileMeta,
};

use crate::error::{AirlockError, Result};
use crate::identity::Principal;
use crate::machine::{self, ActorRole, Trigger};
use crate::review;
use crate::snapshots::SnapshotStore;
use crate::store::{self, Store, map_db_err};
use crate::upload::UploadConfig;
use crate::view::{self, RequestView};
use crate::workspace::{RequestContext, WorkspaceView};

/// One file to add to a request.
#[derive(Debug, Clone)]
pub struct AddFileSpec {
    pub relpath: RelPath,
    pub filetype: FileType,
    pub group: String,
}

/// Requested property changes for an existing file.
#[derive(Debug, Clone, Default)]
pub struct FilePropertyChange {
    pub filetype: Option<FileType>,
    pub group: Option<String>,
}

/// Orchestrates the request lifecycle over the store, snapshot store, and
/// workspace view. Cheap to clone behind `Arc`s; constructed once at
/// startup.
pub struct RequestController {
    store: Store,
    snapshots: SnapshotStore,
    workspaces: Arc<WorkspaceView>,
    upload_config: UploadConfig,
    upload_nudge: Arc<Notify>,
    outbox_nudge: Arc<Notify>,
}

impl std::fmt::Debug for RequestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestController").finish_non_exhaustive()
    }
}

impl RequestController {
    pub fn new(
        store: Store,
        snapshots: SnapshotStore,
        workspaces: Arc<WorkspaceView>,
        upload_config: UploadConfig,
        upload_nudge: Arc<Notify>,
        outbox_nudge: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            snapshots,
            workspaces,
            upload_config,
            upload_nudge,
            outbox_nudge,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn lifecycle_event(
        kind: EventKind,
        request: &ReleaseRequest,
        actor: &Principal,
    ) -> LifecycleEvent {
        LifecycleEvent::new(
            kind,
            request.id,
            &request.workspace,
            &request.author,
            &actor.username,
            request.review_turn,
        )
    }

    // ------------------------------------------------------------------
    // Request lifecycle
    // ------------------------------------------------------------------

    /// Create a new release request in PENDING at turn 1.
    pub async fn create_request(
        &self,
        principal: &Principal,
        workspace: &str,
    ) -> Result<ReleaseRequest> {
        principal.require_workspace_author(workspace)?;

        let mut tx = self.store.begin().await?;
        if let Some(existing) =
            store::requests::active_for(&mut *tx, workspace, &principal.username).await?
        {
            return Err(AirlockError::Invariant(format!(
                "an active request already exists for this workspace ({})",
                existing.id
            )));
        }

        let request = ReleaseRequest::new(workspace, &principal.username);
        store::requests::insert(&mut *tx, &request).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(request.id, &principal.username, AuditKind::RequestCreated)
                .with_extra("workspace", workspace),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        info!(request_id = %request.id, workspace, author = %principal.username,
              "release request created");
        Ok(request)
    }

    /// Submit (PENDING) or resubmit (RETURNED) a request for review.
    pub async fn submit(&self, principal: &Principal, id: RequestId) -> Result<RequestStatus> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_author_of(&request)?;

        let trigger = match request.status {
            RequestStatus::Returned => Trigger::Resubmit,
            _ => Trigger::Submit,
        };
        let transition = machine::evaluate(request.status, trigger, ActorRole::Author)?;

        let files = store::files::files_for_request(&mut *tx, id).await?;
        let groups = store::files::groups_for_request(&mut *tx, id).await?;
        review::check_submit(&files, &groups)?;

        let new_turn = request.review_turn + i64::from(transition.increments_turn);
        store::requests::update_status(&mut *tx, id, transition.to, new_turn, Utc::now()).await?;

        let (audit_kind, event_kind) = match trigger {
            Trigger::Resubmit => (AuditKind::RequestResubmitted, EventKind::Resubmitted),
            _ => (AuditKind::RequestSubmitted, EventKind::Submitted),
        };
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, audit_kind).with_extra("turn", new_turn),
        )
        .await?;
        store::outbox::enqueue(&mut *tx, &Self::lifecycle_event(event_kind, &request, principal))
            .await?;
        tx.commit().await.map_err(map_db_err)?;
        self.outbox_nudge.notify_one();
        Ok(transition.to)
    }

    /// Withdraw the whole request (author, PENDING/RETURNED only).
    pub async fn withdraw_request(
        &self,
        principal: &Principal,
        id: RequestId,
    ) -> Result<RequestStatus> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_author_of(&request)?;

        let transition =
            machine::evaluate(request.status, Trigger::WithdrawRequest, ActorRole::Author)?;
        store::requests::update_status(&mut *tx, id, transition.to, request.review_turn, Utc::now())
            .await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::RequestWithdrawn),
        )
        .await?;
        store::outbox::enqueue(
            &mut *tx,
            &Self::lifecycle_event(EventKind::Withdrawn, &request, principal),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        self.outbox_nudge.notify_one();
        Ok(transition.to)
    }

    /// Return the request to its author. From REVIEWED the comment gate
    /// applies; early returns (SUBMITTED/PARTIALLY_REVIEWED) skip it.
    pub async fn return_request(
        &self,
        principal: &Principal,
        id: RequestId,
        confirmed: bool,
    ) -> Result<RequestStatus> {
        if !confirmed {
            return Err(AirlockError::Precondition(
                "returning a request must be explicitly confirmed".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_reviewer_for(&request)?;
        let transition =
            machine::evaluate(request.status, Trigger::Return, ActorRole::OutputChecker)?;

        if request.status == RequestStatus::Reviewed {
            let files = store::files::files_for_request(&mut *tx, id).await?;
            let votes = store::reviews::votes_for_request(&mut *tx, id).await?;
            let submissions = store::reviews::submissions_for_request(&mut *tx, id).await?;
            let comments = store::comments::list_for_request(&mut *tx, id).await?;
            let decisions = review::file_decisions(&files, &votes, &submissions);
            review::check_return(request.review_turn, &files, &decisions, &comments)?;
        }

        let new_turn = request.review_turn + i64::from(transition.increments_turn);
        store::requests::update_status(&mut *tx, id, transition.to, new_turn, Utc::now()).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::RequestReturned)
                .with_extra("turn", new_turn),
        )
        .await?;
        store::outbox::enqueue(
            &mut *tx,
            &Self::lifecycle_event(EventKind::Returned, &request, principal),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        self.outbox_nudge.notify_one();
        Ok(transition.to)
    }

    /// Reject a fully reviewed request outright.
    pub async fn reject(&self, principal: &Principal, id: RequestId) -> Result<RequestStatus> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_reviewer_for(&request)?;
        let transition =
            machine::evaluate(request.status, Trigger::Reject, ActorRole::OutputChecker)?;
        store::requests::update_status(&mut *tx, id, transition.to, request.review_turn, Utc::now())
            .await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::RequestRejected),
        )
        .await?;
        store::outbox::enqueue(
            &mut *tx,
            &Self::lifecycle_event(EventKind::Rejected, &request, principal),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        self.outbox_nudge.notify_one();
        Ok(transition.to)
    }

    /// Approve the request for release and enqueue one upload job per
    /// output file. Requires every output file's decision to be APPROVED.
    pub async fn release_files(
        &self,
        principal: &Principal,
        id: RequestId,
    ) -> Result<RequestStatus> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_reviewer_for(&request)?;
        let transition =
            machine::evaluate(request.status, Trigger::ReleaseFiles, ActorRole::OutputChecker)?;

        let files = store::files::files_for_request(&mut *tx, id).await?;
        let votes = store::reviews::votes_for_request(&mut *tx, id).await?;
        let submissions = store::reviews::submissions_for_request(&mut *tx, id).await?;
        let decisions = review::file_decisions(&files, &votes, &submissions);
        review::check_release(&files, &decisions)?;

        store::requests::update_status(&mut *tx, id, transition.to, request.review_turn, Utc::now())
            .await?;

        let now = Utc::now();
        let deadline = now
            + chrono::Duration::from_std(self.upload_config.job_deadline)
                .unwrap_or(chrono::Duration::hours(1));
        for file in files.iter().filter(|f| f.is_active_output()) {
            if file.uploaded_at.is_some() {
                continue;
            }
            let job = UploadJob {
                id: UploadJobId::new(),
                request_id: id,
                file_id: file.id,
                relpath: file.relpath.clone(),
                content_hash: file.content_hash.clone(),
                state: JobState::Queued,
                attempts: 0,
                next_attempt_at: now,
                deadline_at: deadline,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            store::uploads::enqueue(&mut *tx, &job).await?;
        }

        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::RequestApproved),
        )
        .await?;
        store::outbox::enqueue(
            &mut *tx,
            &Self::lifecycle_event(EventKind::Approved, &request, principal),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        info!(request_id = %id, "request approved; uploads scheduled");
        self.upload_nudge.notify_one();
        self.outbox_nudge.notify_one();
        Ok(transition.to)
    }

    /// Re-queue FAILED upload jobs without leaving APPROVED.
    pub async fn re_release(&self, principal: &Principal, id: RequestId) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_reviewer_for(&request)?;
        if request.status != RequestStatus::Approved {
            return Err(AirlockError::InvalidTransition(format!(
                "cannot re-release a request in status {}",
                request.status
            )));
        }

        let now = Utc::now();
        let deadline = now
            + chrono::Duration::from_std(self.upload_config.job_deadline)
                .unwrap_or(chrono::Duration::hours(1));
        let revived = store::uploads::requeue_failed(&mut *tx, id, deadline, now).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::UploadsRequeued)
                .with_extra("jobs", revived as i64),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        self.upload_nudge.notify_one();
        Ok(revived)
    }

    // ------------------------------------------------------------------
    // Files and groups
    // ------------------------------------------------------------------

    /// Add files to the request, snapshotting current workspace bytes.
    /// Creates groups on first use.
    pub async fn add_files(
        &self,
        principal: &Principal,
        id: RequestId,
        specs: Vec<AddFileSpec>,
    ) -> Result<Vec<RequestFile>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        // Snapshot outside the transaction; orphaned content-addressed
        // blobs are harmless if the transaction later rolls back.
        let request = self.load_request(id).await?;
        principal.require_author_of(&request)?;
        self.require_editable(&request)?;

        let mut snapshots = Vec::with_capacity(specs.len());
        for spec in &specs {
            let bytes = self.workspaces.read(&request.workspace, &spec.relpath).await?;
            let hash = self.snapshots.put(&bytes).await?;
            snapshots.push((hash, bytes.len() as i64));
        }

        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        self.require_editable(&request)?;

        let now = Utc::now();
        let mut added = Vec::with_capacity(specs.len());
        for (spec, (hash, size)) in specs.iter().zip(snapshots) {
            if store::files::active_by_relpath(&mut *tx, id, &spec.relpath)
                .await?
                .is_some()
            {
                return Err(AirlockError::Invariant(format!(
                    "file {} is already on the request",
                    spec.relpath
                )));
            }
            let group = self.get_or_create_group(&mut *tx, id, &spec.group).await?;
            let file = RequestFile {
                id: airlock_model::FileId::new(),
                request_id: id,
                group_id: group.id,
                relpath: spec.relpath.clone(),
                filetype: spec.filetype,
                content_hash: hash,
                size,
                added_at: now,
                added_by: principal.username.clone(),
                added_in_turn: request.review_turn,
                withdrawn_at: None,
                withdrawn_in_turn: None,
                uploaded_at: None,
            };
            store::files::insert_file(&mut *tx, &file).await?;
            store::audit::append(
                &mut *tx,
                &AuditEntry::new(id, &principal.username, AuditKind::FileAdded)
                    .with_path(file.relpath.as_str())
                    .with_extra("group", spec.group.as_str())
                    .with_extra("filetype", file.filetype.as_str()),
            )
            .await?;
            added.push(file);
        }
        tx.commit().await.map_err(map_db_err)?;
        Ok(added)
    }

    /// Refresh a file's snapshot from the workspace. Existing votes on the
    /// file no longer apply and are dropped. No-op when the workspace copy
    /// is identical to the snapshot.
    pub async fn update_file(
        &self,
        principal: &Principal,
        id: RequestId,
        relpath: &RelPath,
    ) -> Result<RequestFile> {
        let request = self.load_request(id).await?;
        principal.require_author_of(&request)?;
        self.require_editable(&request)?;

        let bytes = self.workspaces.read(&request.workspace, relpath).await?;
        let hash = self.snapshots.put(&bytes).await?;
        let size = bytes.len() as i64;

        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        self.require_editable(&request)?;
        let file = store::files::active_by_relpath(&mut *tx, id, relpath)
            .await?
            .ok_or_else(|| AirlockError::NotFound(format!("file {relpath} on request")))?;

        if file.content_hash == hash {
            return Ok(file);
        }

        store::files::update_snapshot(
            &mut *tx,
            file.id,
            &hash,
            size,
            &principal.username,
            request.review_turn,
            Utc::now(),
        )
        .await?;
        store::reviews::delete_votes_for_file(&mut *tx, file.id).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::FileUpdated)
                .with_path(relpath.as_str()),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        store::files::get_file(&mut *conn, file.id).await
    }

    /// Withdraw a file. In PENDING the row disappears; in RETURNED it is
    /// tombstoned so the review trail keeps the history.
    pub async fn withdraw_file(
        &self,
        principal: &Principal,
        id: RequestId,
        relpath: &RelPath,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_author_of(&request)?;
        self.require_editable(&request)?;

        let file = store::files::active_by_relpath(&mut *tx, id, relpath)
            .await?
            .ok_or_else(|| AirlockError::NotFound(format!("file {relpath} on request")))?;

        match request.status {
            RequestStatus::Pending => {
                store::reviews::delete_votes_for_file(&mut *tx, file.id).await?;
                store::files::delete_file(&mut *tx, file.id).await?;
            }
            RequestStatus::Returned => {
                store::files::mark_withdrawn(&mut *tx, file.id, Utc::now(), request.review_turn)
                    .await?;
            }
            _ => {
                return Err(AirlockError::Precondition(format!(
                    "files cannot be withdrawn in status {}",
                    request.status
                )));
            }
        }

        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::FileWithdrawn)
                .with_path(relpath.as_str()),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    /// Change a file's type and/or move it to another group.
    pub async fn change_file_properties(
        &self,
        principal: &Principal,
        id: RequestId,
        relpath: &RelPath,
        change: FilePropertyChange,
    ) -> Result<RequestFile> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_author_of(&request)?;
        self.require_editable(&request)?;

        let file = store::files::active_by_relpath(&mut *tx, id, relpath)
            .await?
            .ok_or_else(|| AirlockError::NotFound(format!("file {relpath} on request")))?;

        let filetype = change.filetype.unwrap_or(file.filetype);
        let group_id = match &change.group {
            Some(name) => self.get_or_create_group(&mut *tx, id, name).await?.id,
            None => file.group_id,
        };
        store::files::update_properties(&mut *tx, file.id, filetype, group_id).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::FilePropertiesChanged)
                .with_path(relpath.as_str())
                .with_extra("filetype", filetype.as_str()),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        store::files::get_file(&mut *conn, file.id).await
    }

    /// Edit a group's context/controls text.
    pub async fn edit_group(
        &self,
        principal: &Principal,
        id: RequestId,
        group_name: &str,
        context: Option<String>,
        controls: Option<String>,
    ) -> Result<FileGroup> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_author_of(&request)?;
        self.require_editable(&request)?;

        let group = store::files::group_by_name(&mut *tx, id, group_name)
            .await?
            .ok_or_else(|| AirlockError::NotFound(format!("file group {group_name}")))?;
        let context = context.unwrap_or_else(|| group.context.clone());
        let controls = controls.unwrap_or_else(|| group.controls.clone());
        store::files::update_group_text(&mut *tx, group.id, &context, &controls).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::GroupEdited)
                .with_extra("group", group_name),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        Ok(FileGroup {
            context,
            controls,
            ..group
        })
    }

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    /// Add a comment to a group. Authors comment publicly while the request
    /// is in their hands; output checkers comment (privately or publicly)
    /// during review phases.
    pub async fn create_comment(
        &self,
        principal: &Principal,
        id: RequestId,
        group_name: &str,
        body: String,
        visibility: Visibility,
    ) -> Result<Comment> {
        if body.trim().is_empty() {
            return Err(AirlockError::Precondition(
                "comments cannot be empty".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        let group = store::files::group_by_name(&mut *tx, id, group_name)
            .await?
            .ok_or_else(|| AirlockError::NotFound(format!("file group {group_name}")))?;

        if principal.is_author_of(&request) {
            if !request.status.author_editable() {
                return Err(AirlockError::Precondition(
                    "authors may only comment while the request is in their hands".to_string(),
                ));
            }
            if visibility != Visibility::Public {
                return Err(AirlockError::Precondition(
                    "author comments are always public".to_string(),
                ));
            }
        } else {
            principal.require_reviewer_for(&request)?;
            if !matches!(
                request.status,
                RequestStatus::Submitted
                    | RequestStatus::PartiallyReviewed
                    | RequestStatus::Reviewed
            ) {
                return Err(AirlockError::Precondition(
                    "reviewers may only comment during review".to_string(),
                ));
            }
        }

        let comment = Comment {
            id: CommentId::new(),
            request_id: id,
            group_id: group.id,
            author: principal.username.clone(),
            body,
            visibility,
            review_turn: request.review_turn,
            created_at: Utc::now(),
        };
        store::comments::insert(&mut *tx, &comment).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::CommentCreated)
                .with_extra("group", group_name)
                .with_extra("visibility", visibility.as_str()),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(comment)
    }

    /// Promote a private comment to public; author-only, same turn only.
    pub async fn promote_comment(
        &self,
        principal: &Principal,
        comment_id: CommentId,
    ) -> Result<Comment> {
        let mut tx = self.store.begin().await?;
        let mut comment = store::comments::get(&mut *tx, comment_id).await?;
        if comment.author != principal.username {
            return Err(AirlockError::PermissionDenied(
                "only the comment author may change its visibility".to_string(),
            ));
        }
        let request = store::requests::get(&mut *tx, comment.request_id).await?;
        if comment.review_turn != request.review_turn {
            return Err(AirlockError::Precondition(
                "comments from earlier turns can no longer be promoted".to_string(),
            ));
        }
        if comment.visibility == Visibility::Public {
            return Ok(comment);
        }

        store::comments::set_visibility(&mut *tx, comment_id, Visibility::Public).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(comment.request_id, &principal.username, AuditKind::CommentPromoted),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;

        comment.visibility = Visibility::Public;
        Ok(comment)
    }

    /// Delete a comment; author-only, same turn only.
    pub async fn delete_comment(
        &self,
        principal: &Principal,
        comment_id: CommentId,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let comment = store::comments::get(&mut *tx, comment_id).await?;
        if comment.author != principal.username {
            return Err(AirlockError::PermissionDenied(
                "only the comment author may delete it".to_string(),
            ));
        }
        let request = store::requests::get(&mut *tx, comment.request_id).await?;
        if comment.review_turn != request.review_turn {
            return Err(AirlockError::Precondition(
                "comments from earlier turns can no longer be deleted".to_string(),
            ));
        }

        store::comments::delete(&mut *tx, comment_id).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(comment.request_id, &principal.username, AuditKind::CommentDeleted),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------

    /// Cast (or change) a vote on a file for the current turn. Repeating
    /// the same choice is a no-op; votes stay private to the reviewer until
    /// they submit their review.
    pub async fn vote(
        &self,
        principal: &Principal,
        id: RequestId,
        relpath: &RelPath,
        choice: VoteChoice,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_reviewer_for(&request)?;
        if !request.status.under_independent_review() {
            return Err(AirlockError::Precondition(format!(
                "votes are only accepted during independent review (status is {})",
                request.status
            )));
        }
        if store::reviews::has_submitted(&mut *tx, id, &principal.username, request.review_turn)
            .await?
        {
            return Err(AirlockError::Precondition(
                "review already submitted for this turn".to_string(),
            ));
        }

        let file = store::files::active_by_relpath(&mut *tx, id, relpath)
            .await?
            .ok_or_else(|| AirlockError::NotFound(format!("file {relpath} on request")))?;

        let existing = store::reviews::fetch_vote(
            &mut *tx,
            file.id,
            &principal.username,
            request.review_turn,
        )
        .await?;
        if existing.as_ref().map(|v| v.choice) == Some(choice) {
            // Idempotent repeat: same row, no extra audit entry.
            return Ok(());
        }

        store::reviews::upsert_vote(
            &mut *tx,
            &Vote {
                file_id: file.id,
                reviewer: principal.username.clone(),
                review_turn: request.review_turn,
                choice,
                created_at: Utc::now(),
            },
        )
        .await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::VoteCast)
                .with_path(relpath.as_str())
                .with_extra("choice", choice.as_str())
                .with_extra("turn", request.review_turn),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    /// Submit the caller's review for the current turn. The first
    /// submission moves SUBMITTED -> PARTIALLY_REVIEWED, the second
    /// PARTIALLY_REVIEWED -> REVIEWED. Idempotent once recorded.
    pub async fn submit_review(
        &self,
        principal: &Principal,
        id: RequestId,
    ) -> Result<RequestStatus> {
        let mut tx = self.store.begin().await?;
        let request = store::requests::get(&mut *tx, id).await?;
        principal.require_reviewer_for(&request)?;

        if store::reviews::has_submitted(&mut *tx, id, &principal.username, request.review_turn)
            .await?
        {
            return Ok(request.status);
        }
        if !request.status.under_independent_review() {
            return Err(AirlockError::InvalidTransition(format!(
                "cannot submit a review for a request in status {}",
                request.status
            )));
        }

        let files = store::files::files_for_request(&mut *tx, id).await?;
        let votes = store::reviews::votes_for_request(&mut *tx, id).await?;
        let comments = store::comments::list_for_request(&mut *tx, id).await?;
        review::check_submit_review(
            &principal.username,
            request.review_turn,
            &files,
            &votes,
            &comments,
        )?;

        store::reviews::insert_submission(
            &mut *tx,
            &ReviewSubmission {
                request_id: id,
                reviewer: principal.username.clone(),
                review_turn: request.review_turn,
                submitted_at: Utc::now(),
            },
        )
        .await?;

        let submitted =
            store::reviews::submitted_reviewer_count(&mut *tx, id, request.review_turn).await?;
        let trigger = if submitted >= 2 {
            Trigger::SecondReviewSubmitted
        } else {
            Trigger::FirstReviewSubmitted
        };
        let transition = machine::evaluate(request.status, trigger, ActorRole::System)?;
        store::requests::update_status(
            &mut *tx,
            id,
            transition.to,
            request.review_turn,
            Utc::now(),
        )
        .await?;

        store::audit::append(
            &mut *tx,
            &AuditEntry::new(id, &principal.username, AuditKind::ReviewSubmitted)
                .with_extra("turn", request.review_turn),
        )
        .await?;
        store::outbox::enqueue(
            &mut *tx,
            &Self::lifecycle_event(EventKind::ReviewSubmitted, &request, principal),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        self.outbox_nudge.notify_one();
        Ok(transition.to)
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// The request as `principal` may see it, blinding applied.
    pub async fn request_view(
        &self,
        principal: &Principal,
        id: RequestId,
    ) -> Result<RequestView> {
        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        let request = store::requests::get(&mut *conn, id).await?;
        principal.require_view(&request)?;

        let groups = store::files::groups_for_request(&mut *conn, id).await?;
        let files = store::files::files_for_request(&mut *conn, id).await?;
        let votes = store::reviews::votes_for_request(&mut *conn, id).await?;
        let submissions = store::reviews::submissions_for_request(&mut *conn, id).await?;
        let comments = store::comments::list_for_request(&mut *conn, id).await?;

        Ok(view::build(
            principal,
            &request,
            &groups,
            &files,
            &votes,
            &submissions,
            &comments,
        ))
    }

    /// The caller's active request in a workspace, if any.
    pub async fn active_request(
        &self,
        principal: &Principal,
        workspace: &str,
    ) -> Result<Option<RequestView>> {
        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        let Some(request) =
            store::requests::active_for(&mut *conn, workspace, &principal.username).await?
        else {
            return Ok(None);
        };
        drop(conn);
        self.request_view(principal, request.id).await.map(Some)
    }

    /// Per-request audit trail.
    pub async fn audit_log(
        &self,
        principal: &Principal,
        id: RequestId,
    ) -> Result<Vec<airlock_model::AuditEntry>> {
        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        let request = store::requests::get(&mut *conn, id).await?;
        principal.require_view(&request)?;
        store::audit::list_for_request(&mut *conn, id).await
    }

    /// Upload jobs for a request (release progress panel).
    pub async fn upload_jobs(
        &self,
        principal: &Principal,
        id: RequestId,
    ) -> Result<Vec<UploadJob>> {
        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        let request = store::requests::get(&mut *conn, id).await?;
        principal.require_view(&request)?;
        store::uploads::list_for_request(&mut *conn, id).await
    }

    /// Workspace directory listing with per-path request status.
    pub async fn workspace_listing(
        &self,
        principal: &Principal,
        workspace: &str,
        path: Option<&RelPath>,
    ) -> Result<Vec<WorkspaceFileMeta>> {
        if !principal.can_read_workspace(workspace) {
            return Err(AirlockError::PermissionDenied(format!(
                "no access to workspace {workspace}"
            )));
        }

        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        let mut context = RequestContext {
            released: store::requests::released_relpaths(&mut *conn, workspace).await?,
            ..RequestContext::default()
        };
        if let Some(request) =
            store::requests::active_for(&mut *conn, workspace, &principal.username).await?
        {
            let files = store::files::files_for_request(&mut *conn, request.id).await?;
            for file in files.iter().filter(|f| !f.is_withdrawn()) {
                context
                    .on_request
                    .insert(file.relpath.as_str().to_string(), file.content_hash.clone());
            }
        }
        drop(conn);

        self.workspaces.list(workspace, path, &context).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load_request(&self, id: RequestId) -> Result<ReleaseRequest> {
        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        store::requests::get(&mut *conn, id).await
    }

    fn require_editable(&self, request: &ReleaseRequest) -> Result<()> {
        if request.status.author_editable() {
            Ok(())
        } else {
            Err(AirlockError::Precondition(format!(
                "request is not editable in status {}",
                request.status
            )))
        }
    }

    async fn get_or_create_group(
        &self,
        tx: &mut sqlx::SqliteConnection,
        id: RequestId,
        name: &str,
    ) -> Result<FileGroup> {
        if name.trim().is_empty() {
            return Err(AirlockError::Precondition(
                "file group names cannot be empty".to_string(),
            ));
        }
        if let Some(group) = store::files::group_by_name(tx, id, name).await? {
            return Ok(group);
        }
        let group = FileGroup {
            id: airlock_model::GroupId::new(),
            request_id: id,
            name: name.to_string(),
            context: String::new(),
            controls: String::new(),
            created_at: Utc::now(),
        };
        store::files::insert_group(tx, &group).await?;
        Ok(group)
    }
}

//! The upload scheduler: claims due jobs, drives attempts, applies backoff,
//! and completes the APPROVED -> RELEASED transition.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use airlock_model::{
    AuditEntry, AuditKind, EventKind, LifecycleEvent, ReleaseRequest, RequestId, RequestStatus,
    UploadJob,
};

use crate::error::Result;
use crate::machine::{self, ActorRole, Trigger};
use crate::snapshots::SnapshotStore;
use crate::store::{self, Store, map_db_err};
use crate::upload::{JobsApi, ReleaseFileSpec, ReleaseManifest, UploadConfig, UploadFailure,
                    backoff_delay};

/// Actor string recorded on scheduler-driven audit entries and events.
const SYSTEM_ACTOR: &str = "system";

/// Persistent-queue worker pool for outbound uploads.
pub struct UploadScheduler {
    store: Store,
    snapshots: SnapshotStore,
    client: Arc<dyn JobsApi>,
    config: UploadConfig,
    nudge: Arc<Notify>,
    outbox_nudge: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    /// Serializes release creation per request so exactly one manifest is
    /// posted upstream even when several file jobs race.
    release_locks: DashMap<RequestId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for UploadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UploadScheduler {
    pub fn new(
        store: Store,
        snapshots: SnapshotStore,
        client: Arc<dyn JobsApi>,
        config: UploadConfig,
        nudge: Arc<Notify>,
        outbox_nudge: Arc<Notify>,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight));
        Arc::new(Self {
            store,
            snapshots,
            client,
            config,
            nudge,
            outbox_nudge,
            semaphore,
            release_locks: DashMap::new(),
        })
    }

    pub fn nudge_handle(&self) -> Arc<Notify> {
        self.nudge.clone()
    }

    /// Startup recovery: any job a previous process left in flight goes
    /// back to the queue.
    pub async fn recover(&self) -> Result<u64> {
        let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
        let revived = store::uploads::requeue_stale_in_flight(&mut *conn, Utc::now()).await?;
        if revived > 0 {
            info!(revived, "requeued in-flight upload jobs from previous run");
        }
        Ok(revived)
    }

    /// Claim and process every currently due job, waiting for all attempts
    /// to finish. Concurrency is bounded by the semaphore; the claim itself
    /// guarantees a job is only ever held by one worker.
    pub async fn drain_due(self: &Arc<Self>) -> Result<usize> {
        let mut tasks = JoinSet::new();
        let mut claimed = 0;
        loop {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
            let job = store::uploads::claim_next_due(&mut *conn, Utc::now()).await?;
            drop(conn);
            let Some(job) = job else {
                drop(permit);
                break;
            };
            claimed += 1;
            let this = self.clone();
            tasks.spawn(async move {
                this.process_job(job).await;
                drop(permit);
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "upload worker panicked");
            }
        }
        Ok(claimed)
    }

    /// Run until shutdown: drain on nudges and on the poll interval (which
    /// is what wakes the loop for backoff expirations).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.nudge.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    debug!("upload scheduler shutting down");
                    return;
                }
            }
            if let Err(err) = self.drain_due().await {
                warn!(error = %err, "upload drain failed");
            }
        }
    }

    async fn process_job(&self, job: UploadJob) {
        if let Err(err) = self.try_process_job(&job).await {
            // Store-level failure mid-attempt: put the job back so it is
            // retried rather than stranded in flight.
            warn!(job_id = %job.id, error = %err, "upload attempt aborted; requeueing");
            if let Ok(mut conn) = self.store.pool().acquire().await {
                let _ = store::uploads::reschedule(
                    &mut *conn,
                    job.id,
                    job.attempts,
                    Utc::now(),
                    &err.to_string(),
                    Utc::now(),
                )
                .await;
            }
        }
    }

    async fn try_process_job(&self, job: &UploadJob) -> Result<()> {
        let now = Utc::now();
        if now > job.deadline_at {
            return self
                .fail_job(job, "job deadline exceeded before completion")
                .await;
        }

        let request = {
            let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
            store::requests::get(&mut *conn, job.request_id).await?
        };
        if request.status != RequestStatus::Approved {
            // A request can only leave APPROVED through this scheduler, so
            // a mismatch means this job already became irrelevant.
            return self
                .fail_job(job, &format!("request is {}, not approved", request.status))
                .await;
        }

        let release_url = match self.ensure_release(&request).await {
            Ok(url) => url,
            Err(failure) => return self.handle_failure(job, failure).await,
        };

        let bytes = self.snapshots.get(&job.content_hash).await?;
        debug!(
            job_id = %job.id,
            request_id = %job.request_id,
            relpath = %job.relpath,
            attempt = job.attempts + 1,
            "uploading file"
        );

        match self
            .client
            .upload_file(&release_url, job.relpath.file_name(), &job.content_hash, bytes)
            .await
        {
            Ok(_) => self.complete_job(job, &request).await,
            Err(failure) => self.handle_failure(job, failure).await,
        }
    }

    /// Create the upstream release once per request, memoized in the store.
    async fn ensure_release(
        &self,
        request: &ReleaseRequest,
    ) -> std::result::Result<String, UploadFailure> {
        if let Some(url) = &request.jobs_release_url {
            return Ok(url.clone());
        }

        let lock = self
            .release_locks
            .entry(request.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-read under the lock; another job may have won the race.
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| UploadFailure::Transient(format!("store unavailable: {e}")))?;
        let fresh = store::requests::get(&mut *conn, request.id)
            .await
            .map_err(|e| UploadFailure::Transient(format!("store unavailable: {e}")))?;
        if let Some(url) = &fresh.jobs_release_url {
            return Ok(url.clone());
        }

        let files = store::files::files_for_request(&mut *conn, request.id)
            .await
            .map_err(|e| UploadFailure::Transient(format!("store unavailable: {e}")))?;
        let manifest = ReleaseManifest {
            files: files
                .iter()
                .filter(|f| f.is_active_output())
                .map(|f| ReleaseFileSpec {
                    name: f.relpath.as_str().to_string(),
                    url: None,
                    size: f.size,
                    sha256: f.content_hash.clone(),
                    filetype: f.filetype.as_str().to_string(),
                    released_by: request.author.clone(),
                })
                .collect(),
        };

        let handle = self.client.create_release(&request.workspace, &manifest).await?;
        info!(
            request_id = %request.id,
            release_id = %handle.release_id,
            "created upstream release"
        );
        store::requests::set_release_handle(&mut *conn, request.id, &handle.release_id, &handle.url)
            .await
            .map_err(|e| UploadFailure::Transient(format!("store unavailable: {e}")))?;
        Ok(handle.url)
    }

    /// Mark success, stamp the file, and release the request when it was
    /// the last outstanding output.
    async fn complete_job(&self, job: &UploadJob, request: &ReleaseRequest) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        store::uploads::mark_succeeded(&mut *tx, job.id, now).await?;
        store::files::set_uploaded(&mut *tx, job.file_id, now).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(job.request_id, SYSTEM_ACTOR, AuditKind::UploadSucceeded)
                .with_path(job.relpath.as_str())
                .with_extra("attempts", job.attempts + 1),
        )
        .await?;

        // RELEASED requires uploaded_at on every active output file.
        let fresh = store::requests::get(&mut *tx, job.request_id).await?;
        let files = store::files::files_for_request(&mut *tx, job.request_id).await?;
        let all_uploaded = files
            .iter()
            .filter(|f| f.is_active_output())
            .all(|f| f.uploaded_at.is_some());

        let mut released = false;
        if fresh.status == RequestStatus::Approved && all_uploaded {
            let transition = machine::evaluate(
                fresh.status,
                Trigger::UploadsComplete,
                ActorRole::System,
            )?;
            store::requests::update_status(
                &mut *tx,
                fresh.id,
                transition.to,
                fresh.review_turn,
                now,
            )
            .await?;
            store::audit::append(
                &mut *tx,
                &AuditEntry::new(fresh.id, SYSTEM_ACTOR, AuditKind::RequestReleased),
            )
            .await?;
            store::outbox::enqueue(
                &mut *tx,
                &LifecycleEvent::new(
                    EventKind::Released,
                    fresh.id,
                    &fresh.workspace,
                    &fresh.author,
                    SYSTEM_ACTOR,
                    fresh.review_turn,
                ),
            )
            .await?;
            released = true;
        }

        tx.commit().await.map_err(map_db_err)?;
        if released {
            info!(request_id = %request.id, "all outputs uploaded; request released");
            self.outbox_nudge.notify_one();
        }
        Ok(())
    }

    /// Route a failed attempt to backoff, exhaustion, or permanent failure.
    async fn handle_failure(&self, job: &UploadJob, failure: UploadFailure) -> Result<()> {
        match failure {
            UploadFailure::Permanent(message) => self.fail_job(job, &message).await,
            UploadFailure::Transient(message) => {
                let attempts = job.attempts + 1;
                if attempts >= self.config.max_attempts as i64 {
                    return self
                        .fail_job(job, &format!("{message} (attempts exhausted)"))
                        .await;
                }
                let delay = backoff_delay(&self.config, attempts as u32);
                let next = Utc::now()
                    + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(60));
                if next > job.deadline_at {
                    return self
                        .fail_job(job, &format!("{message} (job deadline exceeded)"))
                        .await;
                }
                debug!(
                    job_id = %job.id,
                    relpath = %job.relpath,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient upload failure; backing off"
                );
                let mut conn = self.store.pool().acquire().await.map_err(map_db_err)?;
                store::uploads::reschedule(&mut *conn, job.id, attempts, next, &message, Utc::now())
                    .await
            }
        }
    }

    /// Terminal job failure: the request stays APPROVED and the failure is
    /// surfaced through the audit log and an `upload_failed` event.
    async fn fail_job(&self, job: &UploadJob, message: &str) -> Result<()> {
        warn!(job_id = %job.id, relpath = %job.relpath, message, "upload job failed");
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        store::uploads::mark_failed(&mut *tx, job.id, message, now).await?;
        store::audit::append(
            &mut *tx,
            &AuditEntry::new(job.request_id, SYSTEM_ACTOR, AuditKind::UploadFailed)
                .with_path(job.relpath.as_str())
                .with_extra("error", message)
                .with_extra("attempts", job.attempts + 1),
        )
        .await?;

        let request = store::requests::get(&mut *tx, job.request_id).await?;
        store::outbox::enqueue(
            &mut *tx,
            &LifecycleEvent::new(
                EventKind::UploadFailed,
                request.id,
                &request.workspace,
                &request.author,
                SYSTEM_ACTOR,
                request.review_turn,
            ),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        self.outbox_nudge.notify_one();
        Ok(())
    }
}

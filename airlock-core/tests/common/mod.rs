#![allow(dead_code)]

//! Shared harness for the lifecycle integration suites.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use airlock_core::events::{EventSink, OutboxDispatcher};
use airlock_core::upload::{
    JobsApi, ReleaseHandle, ReleaseManifest, UploadConfig, UploadFailure, UploadOutcome,
    UploadScheduler,
};
use airlock_core::{Principal, RequestController, SnapshotStore, Store, WorkspaceView};
use airlock_model::{EventKind, LifecycleEvent, RelPath};
use tempfile::TempDir;

/// Records delivered events for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, event: &LifecycleEvent) -> airlock_core::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Scripted Jobs API stub: pops queued responses for uploads, succeeding by
/// default, and records everything it was asked to upload.
#[derive(Debug, Default)]
pub struct ScriptedJobsApi {
    upload_script: std::sync::Mutex<VecDeque<Result<UploadOutcome, UploadFailure>>>,
    uploaded: std::sync::Mutex<Vec<(String, String)>>,
    release_calls: AtomicUsize,
}

impl ScriptedJobsApi {
    pub fn script_upload(&self, result: Result<UploadOutcome, UploadFailure>) {
        self.upload_script.lock().unwrap().push_back(result);
    }

    pub fn uploaded_files(&self) -> Vec<(String, String)> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobsApi for ScriptedJobsApi {
    async fn create_release(
        &self,
        workspace: &str,
        _manifest: &ReleaseManifest,
    ) -> Result<ReleaseHandle, UploadFailure> {
        let n = self.release_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ReleaseHandle {
            release_id: format!("rel-{n}"),
            url: format!("https://jobs.example/releases/{workspace}/rel-{n}"),
        })
    }

    async fn upload_file(
        &self,
        _release_url: &str,
        filename: &str,
        content_hash: &str,
        _bytes: Vec<u8>,
    ) -> Result<UploadOutcome, UploadFailure> {
        let scripted = self.upload_script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(outcome)) => {
                self.uploaded
                    .lock()
                    .unwrap()
                    .push((filename.to_string(), content_hash.to_string()));
                Ok(outcome)
            }
            Some(Err(failure)) => Err(failure),
            None => {
                self.uploaded
                    .lock()
                    .unwrap()
                    .push((filename.to_string(), content_hash.to_string()));
                Ok(UploadOutcome::Uploaded)
            }
        }
    }
}

/// A fully wired engine over temp storage with stubbed externals.
pub struct Harness {
    pub tempdir: TempDir,
    pub store: Store,
    pub controller: RequestController,
    pub scheduler: Arc<UploadScheduler>,
    pub dispatcher: OutboxDispatcher,
    pub sink: Arc<RecordingSink>,
    pub jobs: Arc<ScriptedJobsApi>,
}

impl Harness {
    pub async fn new() -> Self {
        let tempdir = TempDir::new().expect("tempdir");
        let store = Store::open(&tempdir.path().join("airlock.db"))
            .await
            .expect("open store");
        let snapshots = SnapshotStore::new(tempdir.path().join("requests"));
        let workspaces = Arc::new(WorkspaceView::new(tempdir.path().join("workspaces")));

        // Zero backoff keeps retry tests deterministic and fast.
        let config = UploadConfig {
            retry_base: Duration::ZERO,
            retry_jitter: 0.0,
            ..UploadConfig::default()
        };

        let upload_nudge = Arc::new(Notify::new());
        let outbox_nudge = Arc::new(Notify::new());
        let sink = Arc::new(RecordingSink::default());
        let jobs = Arc::new(ScriptedJobsApi::default());

        let scheduler = UploadScheduler::new(
            store.clone(),
            snapshots.clone(),
            jobs.clone(),
            config.clone(),
            upload_nudge.clone(),
            outbox_nudge.clone(),
        );
        let dispatcher = OutboxDispatcher::new(store.clone(), sink.clone(), outbox_nudge.clone());
        let controller = RequestController::new(
            store.clone(),
            snapshots,
            workspaces,
            config,
            upload_nudge,
            outbox_nudge,
        );

        Self {
            tempdir,
            store,
            controller,
            scheduler,
            dispatcher,
            sink,
            jobs,
        }
    }

    pub async fn write_workspace_file(&self, workspace: &str, relpath: &str, bytes: &[u8]) {
        let path = self
            .tempdir
            .path()
            .join("workspaces")
            .join(workspace)
            .join(relpath);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .expect("mkdir");
        tokio::fs::write(path, bytes).await.expect("write");
    }

    pub fn author(&self, name: &str, workspace: &str) -> Principal {
        Principal::new(name).with_workspace(workspace)
    }

    pub fn checker(&self, name: &str) -> Principal {
        Principal::new(name).as_output_checker()
    }

    /// Drain the upload queue until no more jobs are due.
    pub async fn drain_uploads(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.scheduler.drain_due().await.expect("drain uploads");
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    pub async fn drain_events(&self) -> usize {
        self.dispatcher.drain_once().await.expect("drain events")
    }
}

pub fn rel(path: &str) -> RelPath {
    RelPath::new(path).expect("valid relpath")
}

//! Wires the engine together: store, snapshot store, workspace view,
//! controller, upload scheduler, and outbox dispatcher.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use tokio::sync::{Notify, watch};
use tracing::warn;
use url::Url;

use airlock_core::{
    EventSink, OutboxDispatcher, RequestController, SnapshotStore, Store, TracingEventSink,
    UploadScheduler, WorkspaceView,
    upload::{HttpJobsClient, JobsApi, ReleaseHandle, ReleaseManifest, UploadFailure, UploadOutcome},
};

use crate::infra::app_state::AppState;
use crate::infra::config::Config;
use crate::infra::identity::IdentityResolver;
use crate::routes::create_api_router;

/// Everything the running service consists of, handed back to `main` (and
/// to integration tests, which drive the background parts directly).
pub struct App {
    pub router: Router,
    pub state: AppState,
    pub scheduler: Arc<UploadScheduler>,
    pub dispatcher: OutboxDispatcher,
}

/// Refuses uploads until an endpoint is configured; lets the rest of the
/// service run in development setups without a Jobs site.
#[derive(Debug)]
struct UnconfiguredJobsClient;

#[async_trait]
impl JobsApi for UnconfiguredJobsClient {
    async fn create_release(
        &self,
        _workspace: &str,
        _manifest: &ReleaseManifest,
    ) -> Result<ReleaseHandle, UploadFailure> {
        Err(UploadFailure::Permanent(
            "JOBS_API_ENDPOINT is not configured".to_string(),
        ))
    }

    async fn upload_file(
        &self,
        _release_url: &str,
        _filename: &str,
        _content_hash: &str,
        _bytes: Vec<u8>,
    ) -> Result<UploadOutcome, UploadFailure> {
        Err(UploadFailure::Permanent(
            "JOBS_API_ENDPOINT is not configured".to_string(),
        ))
    }
}

fn build_jobs_client(config: &Config) -> anyhow::Result<Arc<dyn JobsApi>> {
    match &config.jobs_api_endpoint {
        Some(endpoint) => {
            let base = Url::parse(endpoint).context("invalid JOBS_API_ENDPOINT")?;
            let client = HttpJobsClient::new(
                base,
                config.jobs_api_token.clone(),
                config.upload_config().attempt_timeout,
            )
            .context("failed to build Jobs API client")?;
            Ok(Arc::new(client))
        }
        None => {
            warn!("JOBS_API_ENDPOINT unset; uploads will fail until configured");
            Ok(Arc::new(UnconfiguredJobsClient))
        }
    }
}

/// Build the application with the given identity resolver and event sink.
pub async fn build_app_with(
    config: Config,
    identity: IdentityResolver,
    sink: Arc<dyn EventSink>,
    jobs_client: Option<Arc<dyn JobsApi>>,
) -> anyhow::Result<App> {
    config.ensure_directories()?;

    let store = Store::connect(&config.database_url())
        .await
        .context("failed to open request store")?;
    let snapshots = SnapshotStore::new(config.request_dir());
    let workspaces = Arc::new(WorkspaceView::new(config.workspace_dir.clone()));

    let upload_nudge = Arc::new(Notify::new());
    let outbox_nudge = Arc::new(Notify::new());

    let jobs_client = match jobs_client {
        Some(client) => client,
        None => build_jobs_client(&config)?,
    };

    let scheduler = UploadScheduler::new(
        store.clone(),
        snapshots.clone(),
        jobs_client,
        config.upload_config(),
        upload_nudge.clone(),
        outbox_nudge.clone(),
    );
    scheduler.recover().await?;

    let dispatcher = OutboxDispatcher::new(store.clone(), sink, outbox_nudge.clone());

    let controller = Arc::new(RequestController::new(
        store,
        snapshots,
        workspaces,
        config.upload_config(),
        upload_nudge,
        outbox_nudge,
    ));

    let config = Arc::new(config);
    let state = AppState::new(controller, Arc::new(identity), config);
    let router = create_api_router(state.clone());

    Ok(App {
        router,
        state,
        scheduler,
        dispatcher,
    })
}

/// Build the application from configuration alone (production path).
pub async fn build_app(config: Config) -> anyhow::Result<App> {
    let identity = match (&config.jobs_api_token, &config.dev_users_file) {
        (Some(token), _) => IdentityResolver::trusted(token.clone()),
        (None, Some(path)) => IdentityResolver::from_dev_users_file(path)
            .with_context(|| format!("failed to load dev users from {}", path.display()))?,
        (None, None) => anyhow::bail!(
            "either JOBS_API_TOKEN or DEV_USERS_FILE must be configured to resolve logins"
        ),
    };

    let sink: Arc<dyn EventSink> = Arc::new(TracingEventSink::new(
        config.output_checking_org.clone(),
        config.output_checking_repo.clone(),
    ));

    build_app_with(config, identity, sink, None).await
}

/// Spawn the background tasks; returns the shutdown trigger.
pub fn spawn_background(app: &App) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(app.scheduler.clone().run(shutdown_rx.clone()));
    tokio::spawn(app.dispatcher.clone().run(shutdown_rx));
    shutdown_tx
}

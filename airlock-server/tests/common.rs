//! Test harness: a fully built app over temp storage with dev users and a
//! stubbed Jobs API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use tempfile::TempDir;
use tower::ServiceExt;

use airlock_core::EventSink;
use airlock_core::upload::{
    JobsApi, ReleaseHandle, ReleaseManifest, UploadFailure, UploadOutcome, UploadScheduler,
};
use airlock_model::LifecycleEvent;
use airlock_server::infra::identity::{DevUser, IdentityResolver};
use airlock_server::infra::startup::{App, build_app_with};
use airlock_server::{AppState, Config};

/// Sink that drops events; server tests assert over HTTP responses.
struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn deliver(&self, _event: &LifecycleEvent) -> airlock_core::Result<()> {
        Ok(())
    }
}

/// Jobs API stub that accepts everything.
struct AcceptingJobsApi;

#[async_trait]
impl JobsApi for AcceptingJobsApi {
    async fn create_release(
        &self,
        workspace: &str,
        _manifest: &ReleaseManifest,
    ) -> Result<ReleaseHandle, UploadFailure> {
        Ok(ReleaseHandle {
            release_id: "rel-1".to_string(),
            url: format!("https://jobs.example/releases/{workspace}/rel-1"),
        })
    }

    async fn upload_file(
        &self,
        _release_url: &str,
        _filename: &str,
        _content_hash: &str,
        _bytes: Vec<u8>,
    ) -> Result<UploadOutcome, UploadFailure> {
        Ok(UploadOutcome::Uploaded)
    }
}

#[allow(unused)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub scheduler: Arc<UploadScheduler>,
    _tempdir: TempDir,
}

#[allow(unused)]
impl TestApp {
    pub async fn spawn() -> TestApp {
        let tempdir = TempDir::new().expect("tempdir");

        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            DevUser {
                output_checker: false,
                workspaces: vec!["ws1".to_string()],
                copilot_workspaces: vec![],
            },
        );
        users.insert(
            "bob".to_string(),
            DevUser {
                output_checker: true,
                workspaces: vec![],
                copilot_workspaces: vec![],
            },
        );
        users.insert(
            "carol".to_string(),
            DevUser {
                output_checker: true,
                workspaces: vec![],
                copilot_workspaces: vec![],
            },
        );

        let config = Config {
            work_dir: tempdir.path().join("airlock"),
            workspace_dir: tempdir.path().join("workspaces"),
            ..Config::default()
        };

        let App {
            router,
            state,
            scheduler,
            dispatcher: _,
        } = build_app_with(
            config,
            IdentityResolver::from_dev_users(users),
            Arc::new(NullSink),
            Some(Arc::new(AcceptingJobsApi)),
        )
        .await
        .expect("build app");

        TestApp {
            router,
            state,
            scheduler,
            _tempdir: tempdir,
        }
    }

    pub async fn write_workspace_file(&self, workspace: &str, relpath: &str, bytes: &[u8]) {
        let path = self
            ._tempdir
            .path()
            .join("workspaces")
            .join(workspace)
            .join(relpath);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .expect("mkdir");
        tokio::fs::write(path, bytes).await.expect("write");
    }

    pub async fn post(
        &self,
        user: Option<&str>,
        uri: &str,
        body: serde_json::Value,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(user) = user {
            builder = builder.header("x-airlock-user", user);
        }
        let request = builder
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_empty(&self, user: Option<&str>, uri: &str) -> Response<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-airlock-user", user);
        }
        let request = builder.body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, user: Option<&str>, uri: &str) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-airlock-user", user);
        }
        let request = builder.body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }
}

#[allow(unused)]
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[allow(unused)]
pub async fn expect_status(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    json_body(response).await
}

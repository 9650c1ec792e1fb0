//! Outbound Jobs-site API client.
//!
//! Two-step contract: create a release for a workspace (returns the upload
//! url), then POST each file's bytes to that url. Status handling:
//! 2xx uploaded, 303/409 already uploaded (success), other 4xx permanent
//! failure, 5xx and transport errors transient.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use url::Url;

/// Upload request body line for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseFileSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub size: i64,
    pub sha256: String,
    pub filetype: String,
    pub released_by: String,
}

/// Manifest posted when creating a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub files: Vec<ReleaseFileSpec>,
}

/// Handle returned by the Jobs site for a created release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseHandle {
    pub release_id: String,
    pub url: String,
}

/// Successful upload outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The upstream already has these bytes (303/409); treated as success.
    AlreadyUploaded,
}

/// Failed upload outcomes, split by retryability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFailure {
    /// Worth retrying with backoff: 5xx, transport errors, timeouts.
    Transient(String),
    /// Will not succeed without upstream change: 400/401/403 and other 4xx.
    Permanent(String),
}

impl UploadFailure {
    pub fn message(&self) -> &str {
        match self {
            UploadFailure::Transient(msg) | UploadFailure::Permanent(msg) => msg,
        }
    }
}

impl std::fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadFailure::Transient(msg) => write!(f, "transient upload failure: {msg}"),
            UploadFailure::Permanent(msg) => write!(f, "permanent upload failure: {msg}"),
        }
    }
}

/// Port for the external Jobs API; the scheduler only ever talks through
/// this, so tests drive it with a scripted stub.
#[async_trait]
pub trait JobsApi: Send + Sync {
    async fn create_release(
        &self,
        workspace: &str,
        manifest: &ReleaseManifest,
    ) -> Result<ReleaseHandle, UploadFailure>;

    async fn upload_file(
        &self,
        release_url: &str,
        filename: &str,
        content_hash: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, UploadFailure>;
}

/// Classify an upstream HTTP status per the retry contract.
pub fn classify_status(status: StatusCode) -> Result<UploadOutcome, UploadFailure> {
    if status == StatusCode::SEE_OTHER || status == StatusCode::CONFLICT {
        return Ok(UploadOutcome::AlreadyUploaded);
    }
    if status.is_success() {
        return Ok(UploadOutcome::Uploaded);
    }
    if status.is_client_error() {
        return Err(UploadFailure::Permanent(format!("upstream returned {status}")));
    }
    Err(UploadFailure::Transient(format!("upstream returned {status}")))
}

fn transport_failure(err: reqwest::Error) -> UploadFailure {
    if err.is_timeout() {
        UploadFailure::Transient("attempt timed out".to_string())
    } else {
        UploadFailure::Transient(format!("transport error: {err}"))
    }
}

/// reqwest-backed implementation of [`JobsApi`].
#[derive(Debug, Clone)]
pub struct HttpJobsClient {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpJobsClient {
    pub fn new(
        base_url: Url,
        token: Option<String>,
        attempt_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // Redirects stay visible: a 303 from the upstream means "already
        // uploaded" and must not be followed into a GET.
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn release_endpoint(&self, workspace: &str) -> Result<Url, UploadFailure> {
        self.base_url
            .join(&format!("api/v2/releases/workspace/{workspace}"))
            .map_err(|err| UploadFailure::Permanent(format!("bad endpoint url: {err}")))
    }
}

#[async_trait]
impl JobsApi for HttpJobsClient {
    async fn create_release(
        &self,
        workspace: &str,
        manifest: &ReleaseManifest,
    ) -> Result<ReleaseHandle, UploadFailure> {
        let url = self.release_endpoint(workspace)?;
        let response = self
            .authorize(self.client.post(url).json(manifest))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        match classify_status(status) {
            Ok(_) => response
                .json::<ReleaseHandle>()
                .await
                .map_err(|err| UploadFailure::Permanent(format!("bad release response: {err}"))),
            Err(failure) => Err(failure),
        }
    }

    async fn upload_file(
        &self,
        release_url: &str,
        filename: &str,
        content_hash: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, UploadFailure> {
        let url = Url::parse(release_url)
            .map_err(|err| UploadFailure::Permanent(format!("bad release url: {err}")))?;
        let response = self
            .authorize(self.client.post(url))
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            )
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("content-hash", content_hash)
            .body(bytes)
            .send()
            .await
            .map_err(transport_failure)?;

        classify_status(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_is_uploaded() {
        assert_eq!(
            classify_status(StatusCode::CREATED).unwrap(),
            UploadOutcome::Uploaded
        );
    }

    #[test]
    fn see_other_and_conflict_count_as_already_uploaded() {
        assert_eq!(
            classify_status(StatusCode::SEE_OTHER).unwrap(),
            UploadOutcome::AlreadyUploaded
        );
        assert_eq!(
            classify_status(StatusCode::CONFLICT).unwrap(),
            UploadOutcome::AlreadyUploaded
        );
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            assert!(matches!(
                classify_status(status),
                Err(UploadFailure::Permanent(_))
            ));
        }
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(matches!(
                classify_status(status),
                Err(UploadFailure::Transient(_))
            ));
        }
    }

    #[test]
    fn manifest_serializes_to_the_wire_shape() {
        let manifest = ReleaseManifest {
            files: vec![ReleaseFileSpec {
                name: "output/a.csv".to_string(),
                url: None,
                size: 12,
                sha256: "abc".to_string(),
                filetype: "output".to_string(),
                released_by: "alice".to_string(),
            }],
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["files"][0]["name"], "output/a.csv");
        assert_eq!(json["files"][0]["sha256"], "abc");
        assert!(json["files"][0].get("url").is_none());
    }
}

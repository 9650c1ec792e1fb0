use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use airlock_core::UploadConfig;

/// Server configuration loaded from environment variables, optionally
/// seeded from a TOML file (`AIRLOCK_CONFIG_PATH`). Environment wins over
/// the file; defaults cover local development.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Storage roots
    pub work_dir: PathBuf,
    pub workspace_dir: PathBuf,
    /// Snapshot store root; defaults to `<work_dir>/requests`.
    pub request_dir: Option<PathBuf>,
    /// Store location; defaults to `sqlite://<work_dir>/airlock.db`.
    pub database_url: Option<String>,

    // Outbound Jobs-site API
    pub jobs_api_endpoint: Option<String>,
    pub jobs_api_token: Option<String>,

    // Local login resolution when no backend token is configured
    pub dev_users_file: Option<PathBuf>,

    // Upload scheduler tuning
    pub upload_max_in_flight: usize,
    pub upload_max_attempts: u32,
    pub upload_attempt_timeout_secs: u64,
    pub upload_job_deadline_secs: u64,

    // Event sink hints
    pub output_checking_org: Option<String>,
    pub output_checking_repo: Option<String>,

    /// Deadline for a single controller operation.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8000,
            work_dir: PathBuf::from("./airlock"),
            workspace_dir: PathBuf::from("./workspaces"),
            request_dir: None,
            database_url: None,
            jobs_api_endpoint: None,
            jobs_api_token: None,
            dev_users_file: None,
            upload_max_in_flight: 4,
            upload_max_attempts: 5,
            upload_attempt_timeout_secs: 30,
            upload_job_deadline_secs: 3600,
            output_checking_org: None,
            output_checking_repo: None,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let mut config = match env::var("AIRLOCK_CONFIG_PATH") {
            Ok(path) => Self::load_from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = env::var("SERVER_HOST") {
            config.server_host = host;
        }
        if let Ok(port) = env::var("SERVER_PORT") {
            config.server_port = port.parse().context("invalid SERVER_PORT")?;
        }
        if let Ok(dir) = env::var("WORK_DIR") {
            config.work_dir = dir.into();
        }
        if let Ok(dir) = env::var("WORKSPACE_DIR") {
            config.workspace_dir = dir.into();
        }
        if let Ok(dir) = env::var("REQUEST_DIR") {
            config.request_dir = Some(dir.into());
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(endpoint) = env::var("JOBS_API_ENDPOINT") {
            config.jobs_api_endpoint = Some(endpoint);
        }
        if let Ok(token) = env::var("JOBS_API_TOKEN") {
            config.jobs_api_token = Some(token);
        }
        if let Ok(path) = env::var("DEV_USERS_FILE") {
            config.dev_users_file = Some(path.into());
        }
        if let Ok(n) = env::var("UPLOAD_MAX_IN_FLIGHT") {
            config.upload_max_in_flight = n.parse().context("invalid UPLOAD_MAX_IN_FLIGHT")?;
        }
        if let Ok(n) = env::var("UPLOAD_MAX_ATTEMPTS") {
            config.upload_max_attempts = n.parse().context("invalid UPLOAD_MAX_ATTEMPTS")?;
        }
        if let Ok(n) = env::var("UPLOAD_ATTEMPT_TIMEOUT") {
            config.upload_attempt_timeout_secs =
                n.parse().context("invalid UPLOAD_ATTEMPT_TIMEOUT")?;
        }
        if let Ok(n) = env::var("UPLOAD_JOB_DEADLINE") {
            config.upload_job_deadline_secs = n.parse().context("invalid UPLOAD_JOB_DEADLINE")?;
        }
        if let Ok(org) = env::var("OUTPUT_CHECKING_ORG") {
            config.output_checking_org = Some(org);
        }
        if let Ok(repo) = env::var("OUTPUT_CHECKING_REPO") {
            config.output_checking_repo = Some(repo);
        }
        if let Ok(n) = env::var("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = n.parse().context("invalid REQUEST_TIMEOUT_SECS")?;
        }

        Ok(config)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err))
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.work_dir)?;
        fs::create_dir_all(self.request_dir())?;
        Ok(())
    }

    pub fn request_dir(&self) -> PathBuf {
        self.request_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("requests"))
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", self.work_dir.join("airlock.db").display())
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            max_in_flight: self.upload_max_in_flight,
            max_attempts: self.upload_max_attempts,
            attempt_timeout: Duration::from_secs(self.upload_attempt_timeout_secs),
            job_deadline: Duration::from_secs(self.upload_job_deadline_secs),
            ..UploadConfig::default()
        }
    }
}

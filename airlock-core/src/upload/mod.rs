//! Reliable delivery of approved files to the external Jobs site.
//!
//! On APPROVED the controller enqueues one persistent job per output file;
//! the scheduler here drives them to completion with bounded concurrency,
//! jittered exponential backoff for transient failures, and a hard per-job
//! deadline. The request leaves APPROVED only when every output file has
//! uploaded, or stays there indefinitely with FAILED jobs awaiting a
//! re-release.

pub mod client;
pub mod scheduler;

use std::time::Duration;

pub use client::{
    HttpJobsClient, JobsApi, ReleaseFileSpec, ReleaseHandle, ReleaseManifest, UploadFailure,
    UploadOutcome,
};
pub use scheduler::UploadScheduler;

/// Tuning for the upload scheduler; defaults match the service contract.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum concurrent upload attempts process-wide.
    pub max_in_flight: usize,
    /// Attempts before a transiently failing job is marked FAILED.
    pub max_attempts: u32,
    /// HTTP timeout per upload attempt.
    pub attempt_timeout: Duration,
    /// Wall-clock budget per job from (re-)enqueue to FAILED.
    pub job_deadline: Duration,
    /// Base delay for exponential backoff.
    pub retry_base: Duration,
    /// Cap on the backoff delay.
    pub retry_max: Duration,
    /// Jitter factor: 0.5 spreads each delay over (0.5x, 1.5x).
    pub retry_jitter: f64,
    /// Idle poll interval of the scheduler loop.
    pub poll_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(30),
            job_deadline: Duration::from_secs(3600),
            retry_base: Duration::from_secs(2),
            retry_max: Duration::from_secs(60),
            retry_jitter: 0.5,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Delay before retry attempt `attempt` (1-indexed): exponential growth
/// capped at `retry_max`, spread by the jitter factor to avoid herding
/// retries onto a recovering upstream.
pub fn backoff_delay(config: &UploadConfig, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let delay = config
        .retry_base
        .saturating_mul(2_u32.saturating_pow(pow))
        .min(config.retry_max);

    if config.retry_jitter <= 0.0 {
        return delay;
    }
    apply_jitter(delay, config.retry_jitter)
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

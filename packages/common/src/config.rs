use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection to the external execution worker.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_worker_url")]
    pub url: String,
    /// Prefix of every key the worker protocol uses. Default: "judge".
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// List the worker pops job ids from, without prefix. Default: "queue".
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

fn default_worker_url() -> String {
    "redis://localhost:6379".into()
}
fn default_key_prefix() -> String {
    "judge".into()
}
fn default_queue_name() -> String {
    "queue".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            url: default_worker_url(),
            key_prefix: default_key_prefix(),
            queue_name: default_queue_name(),
        }
    }
}

/// Polling, retry and timeout policy for in-flight jobs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TrackerConfig {
    /// Delay between two polls of a running job. Default: 500.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive transient failures before the job is failed. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    /// First backoff delay. Default: 200.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling. Default: 5000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Age after which a job still queued or running is failed. Default: 300.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// How often the stuck-job sweeper runs. Default: 30.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How often stale retry entries are purged. Default: 60.
    #[serde(default = "default_retry_cleanup_interval_secs")]
    pub retry_cleanup_interval_secs: u64,
    /// Age after which an untouched retry entry is purged. Default: 600.
    #[serde(default = "default_retry_max_age_secs")]
    pub retry_max_age_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_max_attempts() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_job_timeout_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_retry_cleanup_interval_secs() -> u64 {
    60
}
fn default_retry_max_age_secs() -> u64 {
    600
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            job_timeout_secs: default_job_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retry_cleanup_interval_secs: default_retry_cleanup_interval_secs(),
            retry_max_age_secs: default_retry_max_age_secs(),
        }
    }
}

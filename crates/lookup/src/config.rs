use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8080/proofs";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
/// Caps the backoff at `base * 64`.
pub const DEFAULT_MAX_BACKOFF_EXPONENT: u32 = 6;
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);
pub const DEFAULT_PENDING_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Deserialize)]
pub struct LookupConfig {
    /// Endpoint of the proof server.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Number of concurrent lookup workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_base_backoff")]
    pub base_backoff: Duration,

    #[serde(default = "default_max_backoff_exponent")]
    pub max_backoff_exponent: u32,

    #[serde(default = "default_max_jitter")]
    pub max_jitter: Duration,

    /// Period of scheduling lookups for newly pending transactions.
    #[serde(default = "default_pending_interval")]
    pub pending_interval: Duration,
}

impl LookupConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Delay before retrying a lookup that failed `attempt` times before.
    pub fn retry_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.min(self.max_backoff_exponent).min(31);

        self.base_backoff.saturating_mul(1 << exponent) + jitter
    }

    pub fn random_jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;

        Duration::from_millis(fastrand::u64(0..=max))
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            workers: DEFAULT_WORKERS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff_exponent: DEFAULT_MAX_BACKOFF_EXPONENT,
            max_jitter: DEFAULT_MAX_JITTER,
            pending_interval: DEFAULT_PENDING_INTERVAL,
        }
    }
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_base_backoff() -> Duration {
    DEFAULT_BASE_BACKOFF
}

fn default_max_backoff_exponent() -> u32 {
    DEFAULT_MAX_BACKOFF_EXPONENT
}

fn default_max_jitter() -> Duration {
    DEFAULT_MAX_JITTER
}

fn default_pending_interval() -> Duration {
    DEFAULT_PENDING_INTERVAL
}

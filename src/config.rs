use std::time::Duration;

use serde::Deserialize;

/// Base URL used when nothing is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Environment variable consulted by [`ClientConfig::from_env`].
pub const BASE_URL_ENV: &str = "CLOUDSTORE_API_URL";

/// Age after which a cached GET response is treated as absent (5 minutes).
pub const CACHE_TTL: Duration = Duration::from_millis(300_000);

/// Delay between two polls of the same non-terminal job.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Hard deadline for a single liveness probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Cadence of the cosmetic bootstrap progress counter.
pub const BOOTSTRAP_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Progress step applied on every cosmetic tick.
pub const BOOTSTRAP_TICK_STEP: u8 = 5;

/// Progress ceiling while the health probe is outstanding, and the value it
/// freezes at when the backend is unhealthy.
pub const BOOTSTRAP_HEALTH_PROGRESS: u8 = 30;

/// Progress reported once the backend is known to be healthy.
pub const BOOTSTRAP_HEALTHY_PROGRESS: u8 = 50;

/// Cosmetic pause between reaching 100% and marking the shell ready.
pub const BOOTSTRAP_READY_DELAY: Duration = Duration::from_millis(300);

/// Top-level configuration for the API client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for every endpoint path, without a trailing slash.
    pub base_url: String,
    /// Deadline for the liveness probe in milliseconds.
    pub health_timeout_ms: u64,
    /// Interval between job polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Response cache time-to-live in milliseconds.
    pub cache_ttl_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            health_timeout_ms: HEALTH_CHECK_TIMEOUT.as_millis() as u64,
            poll_interval_ms: JOB_POLL_INTERVAL.as_millis() as u64,
            cache_ttl_ms: CACHE_TTL.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Build a config from the process environment (and `.env`, if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        config.normalized()
    }

    /// Trim whitespace and any trailing `/` from the base URL.
    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

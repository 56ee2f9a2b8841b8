// Liveness probe — one bounded GET against the health endpoint, never cached.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Checking,
    Healthy,
    Unhealthy,
}

/// Why a probe came back unhealthy, so callers can pick different copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthFailure {
    Timeout,
    Network,
    HttpStatus(u16),
    MalformedBody,
    Reported,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub status: HealthState,
    pub error: Option<String>,
    pub failure: Option<HealthFailure>,
    pub service: Option<String>,
    pub version: Option<String>,
}

impl HealthStatus {
    pub fn checking() -> Self {
        Self {
            status: HealthState::Checking,
            error: None,
            failure: None,
            service: None,
            version: None,
        }
    }

    pub fn healthy(service: Option<String>, version: Option<String>) -> Self {
        Self {
            status: HealthState::Healthy,
            service,
            version,
            ..Self::checking()
        }
    }

    pub fn unhealthy(failure: HealthFailure, error: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            error: Some(error.into()),
            failure: Some(failure),
            ..Self::checking()
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: Option<String>,
    service: Option<String>,
    version: Option<String>,
    error: Option<String>,
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check_health(&self, timeout: Duration) -> HealthStatus;
}

pub struct HealthProber {
    client: Client,
    url: String,
}

impl HealthProber {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(Client::new(), config.clone().normalized().health_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> HealthStatus {
        let resp = match self.client.get(&self.url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return HealthStatus::unhealthy(
                    HealthFailure::Network,
                    format!("Unable to reach the server: {}", e),
                )
            }
        };

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str::<HealthBody>(&text).ok();

        if !status.is_success() {
            let detail = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| status.to_string());
            return HealthStatus::unhealthy(
                HealthFailure::HttpStatus(status.as_u16()),
                format!("Health check failed: {}", detail),
            );
        }

        let body = match body {
            Some(body) => body,
            None => {
                return HealthStatus::unhealthy(
                    HealthFailure::MalformedBody,
                    "Health check returned an unreadable response",
                )
            }
        };

        match body.status.as_deref() {
            Some("healthy") => HealthStatus::healthy(body.service, body.version),
            other => {
                let detail = body.error.unwrap_or_else(|| {
                    format!("Service reported status '{}'", other.unwrap_or("unknown"))
                });
                HealthStatus {
                    service: body.service,
                    version: body.version,
                    ..HealthStatus::unhealthy(HealthFailure::Reported, detail)
                }
            }
        }
    }
}

#[async_trait]
impl HealthCheck for HealthProber {
    /// Probe once. Dropping the request on timeout cancels it.
    async fn check_health(&self, timeout: Duration) -> HealthStatus {
        let result = match tokio::time::timeout(timeout, self.probe()).await {
            Ok(result) => result,
            Err(_) => HealthStatus::unhealthy(
                HealthFailure::Timeout,
                format!(
                    "Health check timed out after {} ms. The server may be down or unreachable.",
                    timeout.as_millis()
                ),
            ),
        };

        if result.is_healthy() {
            info!(
                "health check ok service={:?} version={:?}",
                result.service, result.version
            );
        } else {
            warn!(
                "health check failed kind={:?} error={:?}",
                result.failure, result.error
            );
        }
        result
    }
}

//! Readiness Health Checker
//!
//! Polls a candidate backend's HTTP status endpoint until it answers or an
//! overall deadline passes. Any HTTP response counts as ready; only
//! connection failures and timeouts count against the backend.

use std::time::Duration;
use tokio::time::Instant;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Path appended to the backend IP, e.g. `:80/status`
    pub status_url: String,
    /// Delay between probes
    pub interval: Duration,
    /// Timeout for each probe
    pub request_timeout: Duration,
    /// Give up on the backend after this long
    pub deadline: Duration,
}

impl HealthCheckConfig {
    pub fn new(status_url: impl Into<String>, deadline: Duration) -> Self {
        Self {
            status_url: status_url.into(),
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            deadline,
        }
    }
}

/// Errors from readiness polling.
#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("could not build health check client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("{url} did not respond within {waited:?} (last error: {last_error})")]
    Timeout {
        url: String,
        waited: Duration,
        last_error: String,
    },
}

/// Readiness prober for candidate backends.
pub struct HealthChecker {
    config: HealthCheckConfig,
    client: reqwest::Client,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(config: HealthCheckConfig) -> Result<Self, HealthCheckError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    /// Status URL for a backend IP.
    pub fn status_url_for(&self, ip: &str) -> String {
        let host = if ip.contains(':') {
            format!("[{}]", ip)
        } else {
            ip.to_string()
        };
        format!("http://{}{}", host, self.config.status_url)
    }

    /// Single probe; any HTTP response counts as success.
    async fn probe(&self, url: &str) -> Result<(), String> {
        match self.client.get(url).send().await {
            Ok(resp) => {
                tracing::debug!(%url, status = %resp.status(), "status probe answered");
                Ok(())
            }
            Err(e) => Err(format!("request failed: {}", e)),
        }
    }

    /// Poll the backend once per interval until it answers.
    ///
    /// Returns how long the backend took to become ready.
    pub async fn wait_until_ready(&self, ip: &str) -> Result<Duration, HealthCheckError> {
        let url = self.status_url_for(ip);
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut last_error = String::from("no probe completed");

        loop {
            match tokio::time::timeout_at(deadline, self.probe(&url)).await {
                Ok(Ok(())) => return Ok(started.elapsed()),
                Ok(Err(e)) => {
                    tracing::info!(%url, error = %e, "querying status failed");
                    last_error = e;
                }
                Err(_) => break,
            }

            let next = Instant::now() + self.config.interval;
            if next >= deadline {
                break;
            }
            tokio::time::sleep_until(next).await;
        }

        Err(HealthCheckError::Timeout {
            url,
            waited: started.elapsed(),
            last_error,
        })
    }
}

//! Command-line configuration
//!
//! Every flag can also be supplied through a `HOTSWAP_*` environment
//! variable; the command line wins when both are set.

use crate::domain::value_objects::WatchTag;
use crate::infrastructure::health_checker::HealthCheckConfig;
use clap::Parser;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },
}

/// TCP proxy that follows the newest container of an image.
#[derive(Debug, Clone, Parser)]
#[command(name = "hotswap-proxy", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "HOTSWAP_ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Port mappings, e.g. `80=8080,9000-9009=9000`
    #[arg(long, env = "HOTSWAP_PORTS")]
    pub ports: String,

    /// Docker Engine API endpoint
    #[arg(long, env = "HOTSWAP_DOCKER", default_value = "tcp://127.0.0.1:2375")]
    pub docker: String,

    /// Image to follow, optionally with a sub-tag
    #[arg(long, env = "HOTSWAP_TAG")]
    pub tag: String,

    /// Status path appended to a new backend's IP, e.g. `:80/status`
    #[arg(long = "status_url", env = "HOTSWAP_STATUS_URL")]
    pub status_url: Option<String>,

    /// How long a new backend may take to answer its status URL
    #[arg(
        long = "status_timeout",
        env = "HOTSWAP_STATUS_TIMEOUT",
        default_value = "10s",
        value_parser = parse_duration
    )]
    pub status_timeout: Duration,

    /// Delay before a displaced backend is killed
    #[arg(
        long = "grace_period",
        env = "HOTSWAP_GRACE_PERIOD",
        default_value = "10s",
        value_parser = parse_duration
    )]
    pub grace_period: Duration,

    /// How long shutdown waits for open connections
    #[arg(
        long = "drain_timeout",
        env = "HOTSWAP_DRAIN_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration
    )]
    pub drain_timeout: Duration,

    /// Log filter used when RUST_LOG is unset
    #[arg(long = "log-level", env = "HOTSWAP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Reject settings clap accepts but the proxy cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.trim().is_empty() {
            return Err(ConfigError::Missing("ports"));
        }
        if self.tag.trim().is_empty() {
            return Err(ConfigError::Missing("tag"));
        }
        Ok(())
    }

    pub fn watch_tag(&self) -> WatchTag {
        WatchTag::new(self.tag.trim())
    }

    /// Readiness gate settings, or None when no status URL is configured.
    pub fn health_check(&self) -> Option<HealthCheckConfig> {
        self.status_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| HealthCheckConfig::new(url, self.status_timeout))
    }
}

/// Parse `250ms`, `10s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(invalid("expected a number"));
    }
    let n: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;

    let duration = match unit {
        "ms" => Duration::from_millis(n),
        "" | "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.saturating_mul(60)),
        "h" => Duration::from_secs(n.saturating_mul(3600)),
        _ => return Err(invalid("unknown unit, use ms, s, m or h")),
    };
    Ok(duration)
}

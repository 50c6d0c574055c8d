//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the proxy domain.
//! Backends and their lifecycle events are sourced entirely from the
//! orchestrator; the proxy only references them.

use chrono::{DateTime, Utc};

/// A running instance (container) eligible to receive forwarded traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Orchestrator-assigned identifier
    pub id: String,
    /// Address the backend is reachable on (no port)
    pub ip_address: String,
    /// Image reference the backend was started from
    pub tag: String,
    /// When the orchestrator created the backend
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status reported for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Started,
    Stopped,
    Died,
    Killed,
    Other(String),
}

impl EventStatus {
    /// Map an orchestrator status string onto a lifecycle status.
    pub fn from_status(status: &str) -> Self {
        match status {
            "start" => Self::Started,
            "stop" => Self::Stopped,
            "die" => Self::Died,
            "kill" => Self::Killed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A lifecycle notification for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub backend_id: String,
    pub tag: String,
    pub status: EventStatus,
}

impl BackendEvent {
    pub fn new(backend_id: impl Into<String>, tag: impl Into<String>, status: EventStatus) -> Self {
        Self {
            backend_id: backend_id.into(),
            tag: tag.into(),
            status,
        }
    }
}

/// Where a listener currently forwards new connections.
///
/// Always replaced as a whole so the id and address never disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    /// Empty until the first backend is adopted
    pub backend_id: String,
    /// `ip:container_port`, empty until the first backend is adopted
    pub address: String,
}

impl Destination {
    pub fn new(backend_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            address: address.into(),
        }
    }

    /// Whether any backend has been configured yet.
    pub fn is_set(&self) -> bool {
        !self.address.is_empty()
    }
}

/// Join a backend IP and a port, bracketing IPv6 literals.
pub fn backend_address(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

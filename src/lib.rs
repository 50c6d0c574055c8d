//! hotswap-proxy Library
//!
//! This module exposes the proxy components for use in integration tests
//! and as a library.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{ProxyError, ProxyListener, ProxyServer};
pub use adapters::outbound::{DashMapConnectionStore, DockerOrchestrator};
pub use application::{SwitchoverConfig, SwitchoverController, SwitchoverOutcome};
pub use config::{Config, ConfigError};
pub use domain::entities::{Backend, BackendEvent, Destination, EventStatus};
pub use domain::ports::{ConnectionStore, Orchestrator, OrchestratorError};
pub use domain::value_objects::{parse_port_spec, PortMapping, PortSpecError, WatchTag};
pub use infrastructure::{ConnectionTracker, HealthCheckConfig, HealthChecker};

//! Infrastructure Layer
//!
//! Cross-cutting concerns: readiness probing and graceful shutdown.

pub mod health_checker;
pub mod shutdown;

pub use health_checker::{HealthCheckConfig, HealthCheckError, HealthChecker};
pub use shutdown::{shutdown_signal, ConnectionGuard, ConnectionTracker};

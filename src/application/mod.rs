//! Application Layer - Use cases
//!
//! Orchestrates domain services, the proxy server and the orchestrator
//! port to keep traffic flowing to the newest healthy backend.

pub mod switchover;

pub use switchover::{SwitchoverConfig, SwitchoverController, SwitchoverOutcome};

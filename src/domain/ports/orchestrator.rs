//! Orchestrator Port
//!
//! Defines the interface to the system that runs backends. The switchover
//! controller discovers, inspects and terminates backends through it and
//! receives their lifecycle events from it.

use crate::domain::entities::{Backend, BackendEvent};
use crate::domain::value_objects::WatchTag;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors reported by an orchestrator implementation.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("orchestrator returned {status} for {operation}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },
    #[error("could not decode orchestrator response: {0}")]
    Decode(String),
    #[error("unsupported orchestrator endpoint: {0}")]
    Unsupported(String),
}

/// Outbound port to the backend orchestrator (e.g. a Docker daemon).
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List running backends whose image matches `tag`.
    async fn list_running(&self, tag: &WatchTag) -> Result<Vec<Backend>, OrchestratorError>;

    /// Look up the IP address of a backend.
    async fn inspect(&self, id: &str) -> Result<String, OrchestratorError>;

    /// Ask the orchestrator to terminate a backend.
    async fn terminate(&self, id: &str) -> Result<(), OrchestratorError>;

    /// Subscribe to backend lifecycle events.
    ///
    /// Events arrive in the order the orchestrator reports them. The
    /// channel closes when the subscription ends.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<BackendEvent>, OrchestratorError>;
}

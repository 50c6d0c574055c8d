mod connection_store;
mod orchestrator;

pub use connection_store::ConnectionStore;
pub use orchestrator::{Orchestrator, OrchestratorError};

mod dashmap_connection_store;
mod docker_orchestrator;

pub use dashmap_connection_store::DashMapConnectionStore;
pub use docker_orchestrator::DockerOrchestrator;

//! Connection Store Port
//!
//! Defines the interface for tracking open connections per backend.

/// Store for the number of open proxied connections per backend.
///
/// Written by listeners as connections open and close; read when a
/// displaced backend is about to be terminated.
pub trait ConnectionStore: Send + Sync {
    /// Get the number of open connections to a backend.
    fn get_connection_count(&self, backend_id: &str) -> usize;

    /// Record a newly established connection to a backend.
    fn increment_connections(&self, backend_id: &str);

    /// Record that a connection to a backend has closed.
    fn decrement_connections(&self, backend_id: &str);
}

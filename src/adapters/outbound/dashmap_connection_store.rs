//! DashMap Connection Store
//!
//! Implements ConnectionStore using DashMap for lock-free concurrent access.

use crate::domain::ports::ConnectionStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// DashMap-backed connection store.
///
/// A backend has a counter only while it has open connections.
pub struct DashMapConnectionStore {
    connections: DashMap<String, AtomicUsize>,
}

impl DashMapConnectionStore {
    /// Create a new connection store.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }
}

impl Default for DashMapConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStore for DashMapConnectionStore {
    fn get_connection_count(&self, backend_id: &str) -> usize {
        self.connections
            .get(backend_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn increment_connections(&self, backend_id: &str) {
        self.connections
            .entry(backend_id.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn decrement_connections(&self, backend_id: &str) {
        let drained = match self.connections.get(backend_id) {
            Some(c) => {
                // compare_exchange loop so the counter never underflows
                let mut current = c.load(Ordering::Relaxed);
                loop {
                    if current == 0 {
                        break true;
                    }
                    match c.compare_exchange_weak(
                        current,
                        current - 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break current == 1,
                        Err(actual) => current = actual,
                    }
                }
            }
            None => false,
        };

        // The shard read guard is released above; a connection opened in
        // between bumps the count and keeps the entry.
        if drained {
            self.connections
                .remove_if(backend_id, |_, count| count.load(Ordering::Relaxed) == 0);
        }
    }
}

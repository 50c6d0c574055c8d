//! Reconciliation Service
//!
//! Pure domain logic for deciding, at startup, which pre-existing backend
//! keeps serving and which are stale leftovers.
//! This service has NO external dependencies - it's pure Rust.

use crate::domain::entities::Backend;

/// Outcome of startup reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Backend to adopt without a health check
    pub adopt: Backend,
    /// Backends to terminate immediately
    pub terminate: Vec<Backend>,
}

pub struct Reconciler;

impl Reconciler {
    /// Pick the most recently created backend to adopt; everything else
    /// is slated for termination.
    ///
    /// Ties on creation time go to the backend listed first.
    /// Returns None when there is nothing running.
    pub fn plan(backends: Vec<Backend>) -> Option<ReconcilePlan> {
        let latest = backends
            .iter()
            .enumerate()
            .fold(None::<(usize, &Backend)>, |best, (i, b)| match best {
                Some((_, current)) if current.created_at >= b.created_at => best,
                _ => Some((i, b)),
            })
            .map(|(i, _)| i)?;

        let mut terminate = backends;
        let adopt = terminate.remove(latest);
        terminate.retain(|b| b.id != adopt.id);

        Some(ReconcilePlan { adopt, terminate })
    }
}

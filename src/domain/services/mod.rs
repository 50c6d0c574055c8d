mod reconciler;

pub use reconciler::{ReconcilePlan, Reconciler};

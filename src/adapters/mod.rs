//! Adapters Layer
//!
//! Inbound adapters accept client traffic; outbound adapters talk to the
//! orchestrator and hold connection bookkeeping.

pub mod inbound;
pub mod outbound;

//! Domain Layer
//!
//! Port mappings, backends and their lifecycle events, and the outbound
//! ports the application layer drives.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{Backend, BackendEvent, Destination, EventStatus};
pub use value_objects::{parse_port_spec, PortMapping, PortSpecError, WatchTag};

//! farmrelay Registry - who is connected right now
//!
//! This crate tracks every node that has completed its handshake with the
//! relay. Nodes are partitioned by role, so a control panel and a
//! sensor/actuator may share a node id without colliding.
//!
//! # Architecture
//!
//! The registry is a pair of sharded concurrent maps (one per role) behind
//! a cheap, cloneable handle. Each record carries the [`Outbound`] queue of
//! the session that owns it, which is how other sessions reach that node.
//!
//! # Example
//!
//! ```
//! use farmrelay_registry::{NodeRecord, Outbound, Registry, Role};
//! use uuid::Uuid;
//!
//! let registry = Registry::new();
//! let (outbound, _rx) = Outbound::channel(Uuid::new_v4(), 16);
//!
//! registry.register(NodeRecord::control_panel(7, "127.0.0.1:50000".parse().unwrap(), outbound));
//! assert!(registry.find(Role::ControlPanel, 7).is_some());
//! ```

mod outbound;
mod record;
mod registry;
mod role;

pub use outbound::{Outbound, OutboundError};
pub use record::{NodeId, NodeKind, NodeRecord, SensorActuatorState};
pub use registry::Registry;
pub use role::Role;

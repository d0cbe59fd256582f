//! Registry records.
//!
//! One record describes one registered node: who it is, where it connected
//! from, how to reach it, and (for sensor/actuators) its last known state.

use crate::outbound::Outbound;
use crate::role::Role;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use uuid::Uuid;

/// Identifier a node announces during its handshake.
pub type NodeId = i32;

/// Live state of a sensor/actuator node.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorActuatorState {
    pub actuator_id: i32,
    pub actuator_type: String,
    /// Mutated by control commands.
    pub is_on: bool,
    pub sensor_type: String,
    /// Mutated by incoming sensor data.
    pub sensor_value: f64,
}

/// Role-specific part of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    ControlPanel,
    SensorActuator(SensorActuatorState),
}

/// A registered node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: NodeId,

    /// The session that registered this node.
    pub session_id: Uuid,

    /// Remote socket address of the session.
    pub peer: SocketAddr,

    pub connected_at: DateTime<Utc>,

    /// How to reach the node.
    pub outbound: Outbound,

    pub kind: NodeKind,
}

impl NodeRecord {
    /// Creates a control panel record owned by the outbound's session.
    pub fn control_panel(node_id: NodeId, peer: SocketAddr, outbound: Outbound) -> Self {
        Self::new(node_id, peer, outbound, NodeKind::ControlPanel)
    }

    /// Creates a sensor/actuator record owned by the outbound's session.
    pub fn sensor_actuator(
        node_id: NodeId,
        state: SensorActuatorState,
        peer: SocketAddr,
        outbound: Outbound,
    ) -> Self {
        Self::new(node_id, peer, outbound, NodeKind::SensorActuator(state))
    }

    fn new(node_id: NodeId, peer: SocketAddr, outbound: Outbound, kind: NodeKind) -> Self {
        Self {
            node_id,
            session_id: outbound.session_id(),
            peer,
            connected_at: Utc::now(),
            outbound,
            kind,
        }
    }

    /// The registry bucket this record lives in.
    pub fn role(&self) -> Role {
        match self.kind {
            NodeKind::ControlPanel => Role::ControlPanel,
            NodeKind::SensorActuator(_) => Role::SensorActuator,
        }
    }

    pub fn sensor_actuator_state(&self) -> Option<&SensorActuatorState> {
        match &self.kind {
            NodeKind::SensorActuator(state) => Some(state),
            NodeKind::ControlPanel => None,
        }
    }

    pub fn client_address(&self) -> String {
        self.peer.ip().to_string()
    }

    pub fn client_port(&self) -> u16 {
        self.peer.port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_takes_session_from_outbound() {
        let session = Uuid::new_v4();
        let (outbound, _rx) = Outbound::channel(session, 4);
        let record = NodeRecord::control_panel(3, "10.0.0.5:41000".parse().unwrap(), outbound);

        assert_eq!(record.session_id, session);
        assert_eq!(record.role(), Role::ControlPanel);
        assert_eq!(record.client_address(), "10.0.0.5");
        assert_eq!(record.client_port(), 41000);
        assert!(record.sensor_actuator_state().is_none());
    }
}

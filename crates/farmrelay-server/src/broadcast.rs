//! Fan-out and point-to-point delivery.
//!
//! The [`Broadcaster`] reaches every registered node at once (shutdown and
//! warning notices). The [`Forwarder`] reaches exactly one node by role and
//! id. Both only ever queue lines on a session's outbound; they never touch
//! sockets, so a dead peer can't stall the sender.

use crate::protocol::ServerMessage;
use farmrelay_registry::{NodeId, Outbound, OutboundError, Registry, Role};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
}

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("{role} node {node_id} not found")]
    NotFound { role: Role, node_id: NodeId },
    #[error("{role} node {node_id} unreachable: {source}")]
    Unreachable {
        role: Role,
        node_id: NodeId,
        source: DeliveryError,
    },
}

/// Encodes and queues one message on a session.
pub fn deliver(outbound: &Outbound, message: &ServerMessage) -> Result<(), DeliveryError> {
    let line = message.encode()?;
    outbound.send(line)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcaster
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends one message to every registered node.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Registry,
}

impl Broadcaster {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Queues `message` on every outbound registered right now.
    ///
    /// A failing target is logged and counted; the rest still get the
    /// message.
    pub fn broadcast(&self, message: &ServerMessage, reason: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let targets = self.registry.outbounds();

        let line = match message.encode() {
            Ok(line) => line,
            Err(e) => {
                error!("Could not encode {} broadcast: {}", reason, e);
                report.failed = targets.len();
                return report;
            }
        };

        for (role, node_id, outbound) in targets {
            match outbound.send(line.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "Could not deliver {} broadcast to {} node {}: {}",
                        reason, role, node_id, e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "📣 Broadcast {} to {} sessions ({} failed)",
            reason, report.delivered, report.failed
        );
        report
    }

    /// Tells every node the relay is going away.
    pub fn shutdown_all(&self, message: &str) -> BroadcastReport {
        self.broadcast(&ServerMessage::shut_down(message), "shutdown")
    }

    /// Sends a warning notice to every node.
    pub fn warn_all(&self, message: &str) -> BroadcastReport {
        self.broadcast(&ServerMessage::warning(message), "warning")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarder
// ─────────────────────────────────────────────────────────────────────────────

/// Routes messages to a single node.
#[derive(Debug, Clone)]
pub struct Forwarder {
    registry: Registry,
}

impl Forwarder {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Sends a server message to one node.
    pub fn forward(
        &self,
        role: Role,
        node_id: NodeId,
        message: &ServerMessage,
    ) -> Result<(), ForwardError> {
        let record = self
            .registry
            .find(role, node_id)
            .ok_or(ForwardError::NotFound { role, node_id })?;

        deliver(&record.outbound, message).map_err(|source| ForwardError::Unreachable {
            role,
            node_id,
            source,
        })?;
        debug!("Forwarded {:?} to {} node {}", message, role, node_id);
        Ok(())
    }

    /// Relays a client frame to one node unchanged.
    pub fn forward_raw(&self, role: Role, node_id: NodeId, raw: &Value) -> Result<(), ForwardError> {
        let record = self
            .registry
            .find(role, node_id)
            .ok_or(ForwardError::NotFound { role, node_id })?;

        let send = || -> Result<(), DeliveryError> {
            record.outbound.send(serde_json::to_string(raw)?)?;
            Ok(())
        };
        send().map_err(|source| ForwardError::Unreachable {
            role,
            node_id,
            source,
        })?;
        debug!("Relayed frame to {} node {}", role, node_id);
        Ok(())
    }

    /// Switches a sensor/actuator's actuator and tells the node about it.
    ///
    /// The registry is updated before the command is queued, so the new
    /// state is visible even if the node's queue turns out to be dead.
    pub fn command_actuator(&self, node_id: NodeId, is_on: bool) -> Result<(), ForwardError> {
        let role = Role::SensorActuator;
        let record = self
            .registry
            .set_actuator_state(node_id, is_on)
            .ok_or(ForwardError::NotFound { role, node_id })?;

        deliver(&record.outbound, &ServerMessage::ControlCommand { ison: is_on }).map_err(
            |source| ForwardError::Unreachable {
                role,
                node_id,
                source,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmrelay_registry::{NodeRecord, SensorActuatorState};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn control_panel(registry: &Registry, node_id: NodeId) -> mpsc::Receiver<String> {
        let (outbound, rx) = Outbound::channel(Uuid::new_v4(), 8);
        registry.register(NodeRecord::control_panel(
            node_id,
            "127.0.0.1:30000".parse().unwrap(),
            outbound,
        ));
        rx
    }

    fn sensor(registry: &Registry, node_id: NodeId) -> mpsc::Receiver<String> {
        let (outbound, rx) = Outbound::channel(Uuid::new_v4(), 8);
        registry.register(NodeRecord::sensor_actuator(
            node_id,
            SensorActuatorState {
                actuator_id: 1,
                actuator_type: "window".to_string(),
                is_on: false,
                sensor_type: "temperature".to_string(),
                sensor_value: 18.0,
            },
            "127.0.0.1:30001".parse().unwrap(),
            outbound,
        ));
        rx
    }

    #[test]
    fn test_shutdown_reaches_every_live_session_despite_failures() {
        let registry = Registry::new();
        let mut first = control_panel(&registry, 1);
        let broken = sensor(&registry, 2);
        let mut third = sensor(&registry, 3);
        drop(broken);

        let report = Broadcaster::new(registry).shutdown_all("Server is closing...");

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        for rx in [&mut first, &mut third] {
            let json: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(json["type"], "SHUT_DOWN");
            assert_eq!(json["message"], "Server is closing...");
        }
    }

    #[test]
    fn test_broadcast_with_no_sessions() {
        let report = Broadcaster::new(Registry::new()).warn_all("maintenance");
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn test_command_actuator_updates_and_forwards() {
        let registry = Registry::new();
        let mut rx = sensor(&registry, 1);

        Forwarder::new(registry.clone()).command_actuator(1, true).unwrap();

        let state = registry
            .find(Role::SensorActuator, 1)
            .and_then(|r| r.sensor_actuator_state().cloned())
            .unwrap();
        assert!(state.is_on);
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"control_command","ison":true}"#);
    }

    #[test]
    fn test_forward_to_missing_node() {
        let registry = Registry::new();
        let mut rx = sensor(&registry, 1);
        let forwarder = Forwarder::new(registry);

        assert!(matches!(
            forwarder.command_actuator(99, true),
            Err(ForwardError::NotFound { node_id: 99, .. })
        ));
        assert!(matches!(
            forwarder.forward_raw(Role::ControlPanel, 1, &serde_json::json!({"type": "x"})),
            Err(ForwardError::NotFound { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_raw_relays_frame() {
        let registry = Registry::new();
        let mut rx = control_panel(&registry, 4);
        let frame = serde_json::json!({"type": "command_to_control_panel", "nodeid": 4});

        Forwarder::new(registry)
            .forward_raw(Role::ControlPanel, 4, &frame)
            .unwrap();

        let relayed: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(relayed, frame);
    }
}

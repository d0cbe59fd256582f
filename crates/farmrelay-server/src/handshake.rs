//! Connection classification.
//!
//! A new client sends its role token on the first line. Control panels and
//! sensor/actuators follow with a JSON object of initial attributes. Only a
//! complete record is ever registered.

use crate::protocol::{
    self, parse_object, payload, read_line, DecodeError, ReadOutcome, ServerMessage,
    CONTROL_PANEL_COMMANDS, SENSOR_ACTUATOR_COMMANDS,
};
use crate::session::Session;
use farmrelay_registry::{
    NodeId, NodeRecord, Outbound, Registry, Role, SensorActuatorState,
};
use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("connection closed during handshake")]
    Closed,
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("unreadable handshake line: {0}")]
    Malformed(DecodeError),
    #[error("invalid {role} attributes: {source}")]
    Attributes { role: Role, source: DecodeError },
    #[error("{0} clients do not send attributes")]
    NoAttributes(Role),
}

#[derive(Deserialize)]
struct ControlPanelAttributes {
    #[serde(rename = "nodeid", deserialize_with = "protocol::node_id")]
    node_id: NodeId,
}

#[derive(Deserialize)]
struct SensorActuatorAttributes {
    #[serde(rename = "nodeid", deserialize_with = "protocol::node_id")]
    node_id: NodeId,
    #[serde(rename = "actuatorid")]
    actuator_id: i32,
    #[serde(rename = "actuatortype")]
    actuator_type: String,
    #[serde(rename = "ison")]
    is_on: bool,
    #[serde(rename = "sensortype")]
    sensor_type: String,
    #[serde(rename = "sensorvalue")]
    sensor_value: f64,
}

/// Runs the handshake on a fresh connection.
///
/// On success the node is registered and greeted; unclassified clients get
/// a session without a registry entry.
pub async fn perform<R>(
    reader: &mut R,
    peer: SocketAddr,
    outbound: Outbound,
    registry: &Registry,
    max_line: usize,
) -> Result<Session, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let token = next_line(reader, max_line).await?;
    let role = Role::from_token(&token);
    let mut session = Session::new(peer, role, outbound);

    if !role.is_classified() {
        warn!(
            "Client {} announced unknown role {:?}, continuing unregistered",
            peer,
            token.trim()
        );
        return Ok(session);
    }

    let attributes = next_line(reader, max_line).await?;
    let record = build_record(role, &attributes, peer, session.outbound.clone())?;
    session.node_id = Some(record.node_id);
    registry.register(record);

    info!("🌱 Client connected: {}", session);
    greet(&session, registry);
    Ok(session)
}

async fn next_line<R>(reader: &mut R, max_line: usize) -> Result<String, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader, max_line).await {
        ReadOutcome::Line(line) => Ok(line),
        ReadOutcome::Malformed(e) => Err(HandshakeError::Malformed(e)),
        ReadOutcome::Eof => Err(HandshakeError::Closed),
        ReadOutcome::Failed(e) => Err(HandshakeError::Io(e)),
    }
}

/// Builds the record described by an attributes line.
pub fn build_record(
    role: Role,
    line: &str,
    peer: SocketAddr,
    outbound: Outbound,
) -> Result<NodeRecord, HandshakeError> {
    let invalid = |source| HandshakeError::Attributes { role, source };
    let value = parse_object(line).map_err(invalid)?;

    match role {
        Role::ControlPanel => {
            let attrs: ControlPanelAttributes = payload("handshake", value).map_err(invalid)?;
            Ok(NodeRecord::control_panel(attrs.node_id, peer, outbound))
        }
        Role::SensorActuator => {
            let attrs: SensorActuatorAttributes =
                payload("handshake", value).map_err(invalid)?;
            let state = SensorActuatorState {
                actuator_id: attrs.actuator_id,
                actuator_type: attrs.actuator_type,
                is_on: attrs.is_on,
                sensor_type: attrs.sensor_type,
                sensor_value: attrs.sensor_value,
            };
            Ok(NodeRecord::sensor_actuator(attrs.node_id, state, peer, outbound))
        }
        Role::Unclassified => Err(HandshakeError::NoAttributes(role)),
    }
}

/// Sends the post-handshake notices.
fn greet(session: &Session, registry: &Registry) {
    match session.role {
        Role::ControlPanel => {
            session.reply(&ServerMessage::available_commands(CONTROL_PANEL_COMMANDS));
            session.reply(&ServerMessage::control_panels(
                &registry.snapshot(Role::ControlPanel),
            ));
            session.reply(&ServerMessage::sensor_actuators(
                &registry.snapshot(Role::SensorActuator),
            ));
        }
        Role::SensorActuator => {
            session.reply(&ServerMessage::available_commands(SENSOR_ACTUATOR_COMMANDS));
        }
        Role::Unclassified => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    const MAX_LINE: usize = 1024;

    fn peer() -> SocketAddr {
        "127.0.0.1:45678".parse().unwrap()
    }

    fn outbound() -> (Outbound, mpsc::Receiver<String>) {
        Outbound::channel(Uuid::new_v4(), 16)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(serde_json::from_str(&line).unwrap());
        }
        lines
    }

    #[tokio::test]
    async fn test_sensor_actuator_handshake_registers_record() {
        let registry = Registry::new();
        let (out, mut rx) = outbound();
        let input = b"sensor_actuator\n{\"nodeId\":1,\"actuatorId\":11,\"actuatorType\":\"fan\",\"isOn\":false,\"sensorType\":\"temperature\",\"sensorValue\":22.5}\n";
        let mut reader = BufReader::new(&input[..]);

        let session = perform(&mut reader, peer(), out, &registry, MAX_LINE).await.unwrap();

        assert_eq!(session.role, Role::SensorActuator);
        assert_eq!(session.node_id, Some(1));

        let record = registry.find(Role::SensorActuator, 1).unwrap();
        assert_eq!(record.session_id, session.id);
        assert_eq!(record.peer, peer());
        assert_eq!(
            record.sensor_actuator_state().unwrap(),
            &SensorActuatorState {
                actuator_id: 11,
                actuator_type: "fan".to_string(),
                is_on: false,
                sensor_type: "temperature".to_string(),
                sensor_value: 22.5,
            }
        );

        let greeting = drain(&mut rx);
        assert_eq!(greeting.len(), 1);
        assert_eq!(greeting[0]["type"], "available_commands");
    }

    #[tokio::test]
    async fn test_control_panel_gets_commands_and_snapshots() {
        let registry = Registry::new();
        let (out, mut rx) = outbound();
        let mut reader = BufReader::new(&b"CONTROL_PANEL\n{\"nodeId\": 3}\n"[..]);

        perform(&mut reader, peer(), out, &registry, MAX_LINE).await.unwrap();

        let greeting = drain(&mut rx);
        let types: Vec<_> = greeting.iter().map(|m| m["type"].clone()).collect();
        assert_eq!(types, vec!["available_commands", "all", "all_sensors"]);
        assert_eq!(greeting[1]["connectedControlPanelClients"][0]["nodeid"], 3);
        assert!(registry.find(Role::ControlPanel, 3).is_some());
    }

    #[tokio::test]
    async fn test_bad_attributes_register_nothing() {
        let registry = Registry::new();

        for input in [
            &b"CONTROL_PANEL\nnot json\n"[..],
            &b"CONTROL_PANEL\n{\"name\":\"panel\"}\n"[..],
            &b"SENSOR_ACTUATOR\n{\"nodeId\":1,\"actuatorId\":2}\n"[..],
            &b"SENSOR_ACTUATOR\n"[..],
        ] {
            let (out, _rx) = outbound();
            let mut reader = BufReader::new(input);
            assert!(perform(&mut reader, peer(), out, &registry, MAX_LINE).await.is_err());
        }

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unclassified_is_not_registered() {
        let registry = Registry::new();
        let (out, mut rx) = outbound();
        let mut reader = BufReader::new(&b"GREENHOUSE\n"[..]);

        let session = perform(&mut reader, peer(), out, &registry, MAX_LINE).await.unwrap();

        assert_eq!(session.role, Role::Unclassified);
        assert_eq!(session.node_id, None);
        assert!(registry.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_oversized_attributes_are_refused() {
        let registry = Registry::new();
        let (out, _rx) = outbound();
        let mut input = b"CONTROL_PANEL\n{\"nodeId\":1,\"pad\":\"".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_LINE * 4));
        input.extend_from_slice(b"\"}\n");
        let mut reader = BufReader::new(&input[..]);

        assert!(matches!(
            perform(&mut reader, peer(), out, &registry, MAX_LINE).await,
            Err(HandshakeError::Malformed(DecodeError::TooLong { .. }))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_empty_stream_is_closed() {
        let (out, _rx) = outbound();
        let mut reader = BufReader::new(&b""[..]);

        assert!(matches!(
            perform(&mut reader, peer(), out, &Registry::new(), MAX_LINE).await,
            Err(HandshakeError::Closed)
        ));
    }
}

//! The farmrelay line protocol.
//!
//! Every frame is one JSON object terminated by `\n`. Inbound frames are
//! normalized before they are interpreted: object keys and the `type` tag
//! are lower-cased and string values are trimmed, so `{"Type":"SENSOR_DATA",
//! "nodeId":1}` and `{"type":"sensor_data","nodeid":1}` mean the same thing.

use farmrelay_registry::{NodeId, NodeRecord};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Commands offered to a control panel after its handshake.
pub const CONTROL_PANEL_COMMANDS: &[&str] = &[
    "ALL_CONTROL_PANELS",
    "ALL_SENSORS",
    "COMMAND_TO_SENSOR_ACTUATOR",
    "COMMAND_TO_CONTROL_PANEL",
    "GET_SENSOR_DATA",
];

/// Commands offered to a sensor/actuator after its handshake.
pub const SENSOR_ACTUATOR_COMMANDS: &[&str] = &["ALL_SENSORS", "SENSOR_DATA", "ACTUATOR_CONTROL"];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("message has no 'type' field")]
    MissingType,
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
    #[error("line is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },
}

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Result of reading one frame.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A line with its terminator stripped.
    Line(String),
    /// A line that was consumed but cannot be used (bad UTF-8, too long).
    /// The stream is positioned at the start of the next line.
    Malformed(DecodeError),
    /// The peer closed its side.
    Eof,
    /// The socket failed (reset, ...).
    Failed(std::io::Error),
}

/// Reads the next `\n`-terminated line of at most `max_len` bytes,
/// terminator excluded.
///
/// Longer lines are discarded up to and including their terminator without
/// being buffered.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> ReadOutcome
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_len as u64 + 1;
    let mut buf = Vec::new();
    match (&mut *reader).take(limit).read_until(b'\n', &mut buf).await {
        Ok(0) => return ReadOutcome::Eof,
        Ok(_) => {}
        Err(e) => return ReadOutcome::Failed(e),
    }

    if buf.last() != Some(&b'\n') && buf.len() as u64 == limit {
        return match skip_line(reader).await {
            Ok(()) => ReadOutcome::Malformed(DecodeError::TooLong { limit: max_len }),
            Err(e) => ReadOutcome::Failed(e),
        };
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    match String::from_utf8(buf) {
        Ok(line) => ReadOutcome::Line(line),
        Err(e) => ReadOutcome::Malformed(e.into()),
    }
}

/// Drops everything up to and including the next `\n` (or EOF).
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        let (consumed, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

/// Parses a line into a normalized JSON object.
pub fn parse_object(line: &str) -> Result<Value, DecodeError> {
    let value: Value = serde_json::from_str(line.trim())?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    Ok(normalize(value))
}

/// Lower-cases object keys and trims string values, recursively.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key.to_lowercase(), normalize(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    SensorData(SensorDataPayload),
    ActuatorControl(ActuatorControlPayload),
    GetSensorData(GetSensorDataPayload),
    CommandToSensorActuator(CommandToSensorActuatorPayload),
    /// Forwarded verbatim, so the normalized frame is kept.
    CommandToControlPanel {
        node_id: NodeId,
        raw: Value,
    },
    AllControlPanels,
    AllSensors,
    ShutDown {
        message: Option<String>,
    },
    AllControlCommands,
    /// A well-formed frame whose type is not in the catalog.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "sensortype", alias = "type", default)]
    pub sensor_type: Option<String>,
    #[serde(alias = "sensorvalue")]
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorDataPayload {
    #[serde(rename = "nodeid", default, deserialize_with = "optional_node_id")]
    pub node_id: Option<NodeId>,
    #[serde(default, alias = "sensordata")]
    pub readings: Vec<SensorReading>,
    /// Flat single-value form sent by simple nodes.
    #[serde(rename = "sensorvalue", default)]
    pub sensor_value: Option<f64>,
}

impl SensorDataPayload {
    /// The value to store as the node's current reading.
    pub fn latest_value(&self) -> Option<f64> {
        self.sensor_value
            .or_else(|| self.readings.last().map(|r| r.value))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActuatorControlPayload {
    #[serde(rename = "nodeid", deserialize_with = "node_id")]
    pub node_id: NodeId,
    #[serde(rename = "actuatorid", default)]
    pub actuator_id: Option<i32>,
    #[serde(rename = "ison")]
    pub is_on: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GetSensorDataPayload {
    #[serde(rename = "nodeid", deserialize_with = "node_id")]
    pub node_id: NodeId,
    #[serde(default)]
    pub timer: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandToSensorActuatorPayload {
    #[serde(rename = "nodeid", deserialize_with = "node_id")]
    pub node_id: NodeId,
    #[serde(rename = "ison")]
    pub is_on: bool,
}

#[derive(Deserialize)]
struct TargetPayload {
    #[serde(rename = "nodeid", deserialize_with = "node_id")]
    node_id: NodeId,
}

#[derive(Deserialize)]
struct ShutDownPayload {
    #[serde(default)]
    message: Option<String>,
}

impl Envelope {
    /// Decodes one line into a typed envelope.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let mut value = parse_object(line)?;

        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.to_lowercase(),
            _ => return Err(DecodeError::MissingType),
        };
        if let Some(map) = value.as_object_mut() {
            map.insert("type".to_string(), Value::String(kind.clone()));
        }

        let envelope = match kind.as_str() {
            "sensor_data" => Self::SensorData(payload(&kind, value)?),
            "actuator_control" => Self::ActuatorControl(payload(&kind, value)?),
            "get_sensor_data" => Self::GetSensorData(payload(&kind, value)?),
            "command_to_sensor_actuator" => Self::CommandToSensorActuator(payload(&kind, value)?),
            "command_to_control_panel" => {
                let target: TargetPayload = payload(&kind, value.clone())?;
                Self::CommandToControlPanel {
                    node_id: target.node_id,
                    raw: value,
                }
            }
            "all" | "all_control_panels" => Self::AllControlPanels,
            "all_sensors" => Self::AllSensors,
            "shut_down" => {
                let shut_down: ShutDownPayload = payload(&kind, value)?;
                Self::ShutDown {
                    message: shut_down.message,
                }
            }
            "all_control_commands" => Self::AllControlCommands,
            _ => Self::Unknown(kind.clone()),
        };

        Ok(envelope)
    }

    /// The normalized type tag, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::SensorData(_) => "sensor_data",
            Self::ActuatorControl(_) => "actuator_control",
            Self::GetSensorData(_) => "get_sensor_data",
            Self::CommandToSensorActuator(_) => "command_to_sensor_actuator",
            Self::CommandToControlPanel { .. } => "command_to_control_panel",
            Self::AllControlPanels => "all",
            Self::AllSensors => "all_sensors",
            Self::ShutDown { .. } => "shut_down",
            Self::AllControlCommands => "all_control_commands",
            Self::Unknown(kind) => kind,
        }
    }
}

pub(crate) fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

/// Node ids arrive as integers, and sometimes as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(i64),
    Str(String),
}

impl IntOrString {
    fn into_node_id<E: de::Error>(self) -> Result<NodeId, E> {
        match self {
            Self::Int(n) => {
                NodeId::try_from(n).map_err(|_| E::custom(format!("node id {} out of range", n)))
            }
            Self::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid node id {:?}", s))),
        }
    }
}

pub(crate) fn node_id<'de, D>(deserializer: D) -> Result<NodeId, D::Error>
where
    D: Deserializer<'de>,
{
    IntOrString::deserialize(deserializer)?.into_node_id()
}

fn optional_node_id<'de, D>(deserializer: D) -> Result<Option<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<IntOrString>::deserialize(deserializer)?
        .map(IntOrString::into_node_id)
        .transpose()
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound messages
// ─────────────────────────────────────────────────────────────────────────────

/// Messages the relay writes to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "SUCCESS")]
    Success { message: String },

    #[serde(rename = "WARNING")]
    Warning { message: String },

    #[serde(rename = "SHUT_DOWN")]
    ShutDown { message: String },

    #[serde(rename = "available_commands")]
    AvailableCommands { commands: Vec<String> },

    #[serde(rename = "all")]
    AllControlPanels {
        #[serde(rename = "connectedControlPanelClients")]
        clients: Vec<ControlPanelEntry>,
    },

    #[serde(rename = "all_sensors")]
    AllSensors {
        #[serde(rename = "connectedSensorActuatorClients")]
        clients: Vec<SensorActuatorEntry>,
    },

    /// Switches the receiving node's actuator.
    #[serde(rename = "control_command")]
    ControlCommand { ison: bool },

    /// Asks the receiving node for fresh readings.
    #[serde(rename = "get_sensor_data")]
    GetSensorData {
        nodeid: NodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        timer: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlPanelEntry {
    pub nodeid: NodeId,
    #[serde(rename = "clientPort")]
    pub client_port: u16,
    #[serde(rename = "clientAddress")]
    pub client_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorActuatorEntry {
    pub nodeid: NodeId,
    pub actuatorid: i32,
    pub actuatortype: String,
    pub ison: bool,
    pub sensortype: String,
    pub sensorvalue: f64,
    #[serde(rename = "clientPort")]
    pub client_port: u16,
    #[serde(rename = "clientAddress")]
    pub client_address: String,
}

impl From<&NodeRecord> for ControlPanelEntry {
    fn from(record: &NodeRecord) -> Self {
        Self {
            nodeid: record.node_id,
            client_port: record.client_port(),
            client_address: record.client_address(),
        }
    }
}

impl SensorActuatorEntry {
    fn from_record(record: &NodeRecord) -> Option<Self> {
        let state = record.sensor_actuator_state()?;
        Some(Self {
            nodeid: record.node_id,
            actuatorid: state.actuator_id,
            actuatortype: state.actuator_type.clone(),
            ison: state.is_on,
            sensortype: state.sensor_type.clone(),
            sensorvalue: state.sensor_value,
            client_port: record.client_port(),
            client_address: record.client_address(),
        })
    }
}

impl ServerMessage {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    pub fn shut_down(message: impl Into<String>) -> Self {
        Self::ShutDown {
            message: message.into(),
        }
    }

    pub fn available_commands(commands: &[&str]) -> Self {
        Self::AvailableCommands {
            commands: commands.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Snapshot of control panel records.
    pub fn control_panels(records: &[NodeRecord]) -> Self {
        Self::AllControlPanels {
            clients: records.iter().map(ControlPanelEntry::from).collect(),
        }
    }

    /// Snapshot of sensor/actuator records.
    pub fn sensor_actuators(records: &[NodeRecord]) -> Self {
        Self::AllSensors {
            clients: records
                .iter()
                .filter_map(SensorActuatorEntry::from_record)
                .collect(),
        }
    }

    /// Serializes to a single line (no terminator).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmrelay_registry::{Outbound, SensorActuatorState};
    use tokio::io::BufReader;
    use uuid::Uuid;

    #[test]
    fn test_decode_normalizes_keys_and_type() {
        let envelope =
            Envelope::decode(r#"{"Type":"COMMAND_TO_SENSOR_ACTUATOR","nodeId":1,"isOn":true}"#)
                .unwrap();

        assert_eq!(
            envelope,
            Envelope::CommandToSensorActuator(CommandToSensorActuatorPayload {
                node_id: 1,
                is_on: true
            })
        );
    }

    #[test]
    fn test_decode_accepts_string_node_id() {
        let envelope =
            Envelope::decode(r#"{"type":"command_to_control_panel","nodeid":" 4 "}"#).unwrap();

        match envelope {
            Envelope::CommandToControlPanel { node_id, raw } => {
                assert_eq!(node_id, 4);
                assert_eq!(raw["type"], "command_to_control_panel");
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_decode_sensor_data_readings() {
        let envelope = Envelope::decode(
            r#"{"type":"SENSOR_DATA","nodeId":2,"sensorData":[{"type":"temperature","value":19.0,"unit":"C"},{"type":"temperature","value":20.5}]}"#,
        )
        .unwrap();

        let Envelope::SensorData(payload) = envelope else {
            panic!("expected sensor data");
        };
        assert_eq!(payload.node_id, Some(2));
        assert_eq!(payload.readings.len(), 2);
        assert_eq!(payload.latest_value(), Some(20.5));
    }

    #[test]
    fn test_decode_aliases_and_unknown() {
        assert_eq!(
            Envelope::decode(r#"{"type":"ALL_CONTROL_PANELS"}"#).unwrap(),
            Envelope::AllControlPanels
        );
        assert_eq!(
            Envelope::decode(r#"{"type":"all"}"#).unwrap(),
            Envelope::AllControlPanels
        );
        assert_eq!(
            Envelope::decode(r#"{"type":"Open_Window"}"#).unwrap(),
            Envelope::Unknown("open_window".to_string())
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Envelope::decode("[1,2]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            Envelope::decode(r#"{"nodeid":1}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            Envelope::decode(r#"{"type":"command_to_sensor_actuator","nodeid":1}"#),
            Err(DecodeError::Payload { .. })
        ));
    }

    #[test]
    fn test_server_message_wire_format() {
        let json: Value =
            serde_json::from_str(&ServerMessage::success("SENSOR_DATA").encode().unwrap()).unwrap();
        assert_eq!(json["type"], "SUCCESS");
        assert_eq!(json["message"], "SENSOR_DATA");

        let json: Value =
            serde_json::from_str(&ServerMessage::ControlCommand { ison: true }.encode().unwrap())
                .unwrap();
        assert_eq!(json, serde_json::json!({"type": "control_command", "ison": true}));
    }

    #[test]
    fn test_sensor_snapshot_entries() {
        let (outbound, _rx) = Outbound::channel(Uuid::new_v4(), 4);
        let record = NodeRecord::sensor_actuator(
            5,
            SensorActuatorState {
                actuator_id: 50,
                actuator_type: "heater".to_string(),
                is_on: true,
                sensor_type: "humidity".to_string(),
                sensor_value: 64.0,
            },
            "192.168.1.20:5555".parse().unwrap(),
            outbound,
        );

        let line = ServerMessage::sensor_actuators(&[record]).encode().unwrap();
        let json: Value = serde_json::from_str(&line).unwrap();
        let entry = &json["connectedSensorActuatorClients"][0];

        assert_eq!(json["type"], "all_sensors");
        assert_eq!(entry["nodeid"], 5);
        assert_eq!(entry["actuatortype"], "heater");
        assert_eq!(entry["ison"], true);
        assert_eq!(entry["clientPort"], 5555);
        assert_eq!(entry["clientAddress"], "192.168.1.20");
    }

    #[tokio::test]
    async fn test_read_line_strips_terminators() {
        let mut reader = BufReader::new(&b"CONTROL_PANEL\r\n{\"nodeId\":1}\n"[..]);

        assert!(matches!(read_line(&mut reader, 64).await, ReadOutcome::Line(l) if l == "CONTROL_PANEL"));
        assert!(matches!(read_line(&mut reader, 64).await, ReadOutcome::Line(l) if l == "{\"nodeId\":1}"));
        assert!(matches!(read_line(&mut reader, 64).await, ReadOutcome::Eof));
    }

    #[tokio::test]
    async fn test_read_line_skips_invalid_utf8() {
        let mut reader = BufReader::new(&b"{\"type\":\"all\",\"x\":\"\xff\xfe\"}\n{\"type\":\"all\"}\n"[..]);

        assert!(matches!(
            read_line(&mut reader, 64).await,
            ReadOutcome::Malformed(DecodeError::InvalidUtf8(_))
        ));
        assert!(matches!(read_line(&mut reader, 64).await, ReadOutcome::Line(l) if l == "{\"type\":\"all\"}"));
    }

    #[tokio::test]
    async fn test_read_line_discards_overlong_line_and_resyncs() {
        let mut input = vec![b'x'; 10_000];
        input.extend_from_slice(b"\nshort\n");
        let mut reader = BufReader::with_capacity(64, &input[..]);

        assert!(matches!(
            read_line(&mut reader, 16).await,
            ReadOutcome::Malformed(DecodeError::TooLong { limit: 16 })
        ));
        assert!(matches!(read_line(&mut reader, 16).await, ReadOutcome::Line(l) if l == "short"));
        assert!(matches!(read_line(&mut reader, 16).await, ReadOutcome::Eof));
    }

    #[tokio::test]
    async fn test_read_line_accepts_line_at_limit() {
        let mut reader = BufReader::new(&b"abcd\nabcd"[..]);

        assert!(matches!(read_line(&mut reader, 4).await, ReadOutcome::Line(l) if l == "abcd"));
        assert!(matches!(read_line(&mut reader, 4).await, ReadOutcome::Line(l) if l == "abcd"));
    }
}

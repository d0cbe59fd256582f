//! Message handlers.
//!
//! Each handler implements one envelope type of the farmrelay protocol.
//! Handlers never block: replies and forwards are queued on outbounds.

use crate::protocol::{
    ActuatorControlPayload, CommandToSensorActuatorPayload, Envelope, GetSensorDataPayload,
    SensorDataPayload, ServerMessage,
};
use crate::session::Session;
use crate::RelayContext;
use farmrelay_registry::{NodeId, Role};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// What happened to one inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The sender got an answer.
    Replied,
    /// Something was queued for another node.
    Forwarded,
    /// Understood, nothing to do.
    Ignored,
    /// Could not be decoded.
    Rejected,
}

/// Decodes one line and routes it.
pub fn dispatch(line: &str, session: &Session, ctx: &RelayContext) -> Outcome {
    let envelope = match Envelope::decode(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("⚠️  Dropping frame from {}: {}", session, e);
            return Outcome::Rejected;
        }
    };

    debug!("{} -> {}", session, envelope.kind());

    match envelope {
        Envelope::SensorData(payload) => handle_sensor_data(session, ctx, payload),
        Envelope::ActuatorControl(payload) => handle_actuator_control(session, ctx, payload),
        Envelope::GetSensorData(payload) => handle_get_sensor_data(ctx, payload),
        Envelope::CommandToSensorActuator(payload) => {
            handle_command_to_sensor_actuator(session, ctx, payload)
        }
        Envelope::CommandToControlPanel { node_id, raw } => {
            handle_command_to_control_panel(ctx, node_id, &raw)
        }
        Envelope::AllControlPanels => {
            let records = ctx.registry.snapshot(Role::ControlPanel);
            session.reply(&ServerMessage::control_panels(&records));
            Outcome::Replied
        }
        Envelope::AllSensors => {
            let records = ctx.registry.snapshot(Role::SensorActuator);
            session.reply(&ServerMessage::sensor_actuators(&records));
            Outcome::Replied
        }
        Envelope::ShutDown { message } => {
            info!(
                "{} sent shut_down ({}), not propagated",
                session,
                message.as_deref().unwrap_or("no message")
            );
            Outcome::Ignored
        }
        Envelope::AllControlCommands => {
            info!("all_control_commands from {} is not implemented", session);
            Outcome::Ignored
        }
        Envelope::Unknown(kind) => {
            warn!("Unknown message type {:?} from {}", kind, session);
            Outcome::Ignored
        }
    }
}

/// Stores the latest reading of the sending node.
fn handle_sensor_data(session: &Session, ctx: &RelayContext, payload: SensorDataPayload) -> Outcome {
    if let (Role::SensorActuator, Some(node_id)) = (session.role, session.node_id) {
        match payload.latest_value() {
            Some(value) => {
                if ctx.registry.set_sensor_value(node_id, value) {
                    debug!("Sensor node {} now reads {}", node_id, value);
                }
            }
            None => debug!("sensor_data from {} carried no readings", session),
        }
    }

    session.reply(&ServerMessage::success("SENSOR_DATA"));
    Outcome::Replied
}

fn handle_actuator_control(
    session: &Session,
    ctx: &RelayContext,
    payload: ActuatorControlPayload,
) -> Outcome {
    if ctx
        .registry
        .set_actuator_state(payload.node_id, payload.is_on)
        .is_none()
    {
        debug!(
            "actuator_control for unknown sensor/actuator node {}",
            payload.node_id
        );
    }

    session.reply(&ServerMessage::success("ACTUATOR_CONTROL"));
    Outcome::Replied
}

/// Asks a sensor/actuator to report its readings.
fn handle_get_sensor_data(ctx: &RelayContext, payload: GetSensorDataPayload) -> Outcome {
    let request = ServerMessage::GetSensorData {
        nodeid: payload.node_id,
        timer: payload.timer,
    };

    match ctx
        .forwarder
        .forward(Role::SensorActuator, payload.node_id, &request)
    {
        Ok(()) => Outcome::Forwarded,
        Err(e) => {
            error!("get_sensor_data not delivered: {}", e);
            Outcome::Ignored
        }
    }
}

fn handle_command_to_sensor_actuator(
    session: &Session,
    ctx: &RelayContext,
    payload: CommandToSensorActuatorPayload,
) -> Outcome {
    match ctx.forwarder.command_actuator(payload.node_id, payload.is_on) {
        Ok(()) => info!(
            "🔧 {} switched node {} {}",
            session,
            payload.node_id,
            if payload.is_on { "on" } else { "off" }
        ),
        Err(e) => error!("command_to_sensor_actuator not delivered: {}", e),
    }

    session.reply(&ServerMessage::success("COMMAND_TO_SENSOR_ACTUATOR"));
    Outcome::Replied
}

fn handle_command_to_control_panel(ctx: &RelayContext, node_id: NodeId, raw: &Value) -> Outcome {
    match ctx.forwarder.forward_raw(Role::ControlPanel, node_id, raw) {
        Ok(()) => Outcome::Forwarded,
        Err(e) => {
            error!("command_to_control_panel not delivered: {}", e);
            Outcome::Ignored
        }
    }
}

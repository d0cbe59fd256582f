//! Concurrent node registry.
//!
//! The Registry is the only state shared between sessions. Every session,
//! handler and broadcast goes through it; nobody touches the maps directly.

use crate::outbound::Outbound;
use crate::record::{NodeId, NodeKind, NodeRecord};
use crate::role::Role;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Role-partitioned map of registered nodes.
///
/// Cloning is cheap and every clone sees the same maps.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    control_panels: DashMap<NodeId, NodeRecord>,
    sensor_actuators: DashMap<NodeId, NodeRecord>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, role: Role) -> Option<&DashMap<NodeId, NodeRecord>> {
        match role {
            Role::ControlPanel => Some(&self.inner.control_panels),
            Role::SensorActuator => Some(&self.inner.sensor_actuators),
            Role::Unclassified => None,
        }
    }

    /// Inserts a record under its role, replacing any record with the same
    /// node id. Returns the replaced record.
    pub fn register(&self, record: NodeRecord) -> Option<NodeRecord> {
        let bucket = match record.kind {
            NodeKind::ControlPanel => &self.inner.control_panels,
            NodeKind::SensorActuator(_) => &self.inner.sensor_actuators,
        };
        let role = record.role();
        let node_id = record.node_id;

        let displaced = bucket.insert(node_id, record);
        match &displaced {
            Some(old) => warn!(
                "{} node {} re-registered, replacing session {} from {}",
                role, node_id, old.session_id, old.peer
            ),
            None => debug!("Registered {} node {}", role, node_id),
        }
        displaced
    }

    /// Removes a node. Removing an unknown node is a no-op.
    pub fn remove(&self, role: Role, node_id: NodeId) -> Option<NodeRecord> {
        let (_, record) = self.bucket(role)?.remove(&node_id)?;
        debug!("Removed {} node {}", role, node_id);
        Some(record)
    }

    /// Removes a node only if it is still owned by `session_id`.
    ///
    /// A session tearing down must not evict a newer session that has since
    /// registered the same node id.
    pub fn remove_session(&self, role: Role, node_id: NodeId, session_id: Uuid) -> bool {
        let Some(bucket) = self.bucket(role) else {
            return false;
        };
        match bucket.remove_if(&node_id, |_, record| record.session_id == session_id) {
            Some((_, record)) => {
                debug!(
                    "Removed {} node {} (session {}, connected {}s)",
                    role,
                    node_id,
                    session_id,
                    (Utc::now() - record.connected_at).num_seconds()
                );
                true
            }
            None => false,
        }
    }

    /// Looks up a node.
    pub fn find(&self, role: Role, node_id: NodeId) -> Option<NodeRecord> {
        self.bucket(role)?
            .get(&node_id)
            .map(|entry| entry.value().clone())
    }

    /// Copies every record of one role.
    ///
    /// Concurrent writers may or may not be reflected, but the copy is
    /// always a set of whole records.
    pub fn snapshot(&self, role: Role) -> Vec<NodeRecord> {
        match self.bucket(role) {
            Some(bucket) => bucket.iter().map(|entry| entry.value().clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Switches a sensor/actuator's actuator on or off.
    ///
    /// Returns the updated record, or `None` if no such node is registered.
    pub fn set_actuator_state(&self, node_id: NodeId, is_on: bool) -> Option<NodeRecord> {
        let mut entry = self.inner.sensor_actuators.get_mut(&node_id)?;
        if let NodeKind::SensorActuator(state) = &mut entry.value_mut().kind {
            state.is_on = is_on;
        }
        Some(entry.value().clone())
    }

    /// Stores the latest sensor reading for a node. Returns false if the
    /// node is not registered.
    pub fn set_sensor_value(&self, node_id: NodeId, value: f64) -> bool {
        match self.inner.sensor_actuators.get_mut(&node_id) {
            Some(mut entry) => {
                if let NodeKind::SensorActuator(state) = &mut entry.value_mut().kind {
                    state.sensor_value = value;
                }
                true
            }
            None => false,
        }
    }

    /// Number of nodes registered under a role.
    pub fn len(&self, role: Role) -> usize {
        self.bucket(role).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.control_panels.is_empty() && self.inner.sensor_actuators.is_empty()
    }

    /// Every registered outbound queue, across both roles.
    pub fn outbounds(&self) -> Vec<(Role, NodeId, Outbound)> {
        self.inner
            .control_panels
            .iter()
            .chain(self.inner.sensor_actuators.iter())
            .map(|entry| {
                let record = entry.value();
                (record.role(), record.node_id, record.outbound.clone())
            })
            .collect()
    }
}

//! Correlation rows

use heal_types::{ComputeInstance, ControlPlaneRecord, InstanceId, MembershipRecord, Role};
use serde::Serialize;
use std::net::IpAddr;

/// One correlated identity across the three views.
///
/// Each pointer is independently optional:
/// - all set: consistent
/// - `node` empty: the instance never joined or lost its record
/// - `resource` empty on a control-plane row: registry entry missing
/// - `instance` empty: the records are stale
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub role: Role,
    pub instance: Option<ComputeInstance>,
    pub node: Option<MembershipRecord>,
    pub resource: Option<ControlPlaneRecord>,
}

impl NodeInfo {
    /// Instance id of this row, taken from whichever view supplied it.
    pub fn instance_id(&self) -> Option<InstanceId> {
        if let Some(instance) = &self.instance {
            return Some(instance.id.clone());
        }
        if let Some(resource) = &self.resource {
            return Some(resource.instance_id.clone());
        }
        self.node
            .as_ref()
            .and_then(|n| n.provider().ok())
            .map(|p| p.instance().clone())
    }

    /// Address of the machine, preferring the live instance.
    pub fn ip(&self) -> Option<IpAddr> {
        self.instance
            .as_ref()
            .map(|i| i.ip)
            .or_else(|| self.resource.as_ref().map(|r| r.ip))
    }

    /// Human readable name for logs.
    pub fn name(&self) -> String {
        if let Some(node) = &self.node {
            return node.name.clone();
        }
        self.instance_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    pub fn is_consistent(&self) -> bool {
        let resource_ok = !self.role.is_master() || self.resource.is_some();
        self.instance.is_some()
            && resource_ok
            && self.node.as_ref().map(|n| n.is_ready()).unwrap_or(false)
    }
}

//! Control-plane registry entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::ids::InstanceId;

/// Declarative assertion that an instance participates in the control plane.
///
/// Only the engine's metadata phase creates or deletes these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneRecord {
    /// Record name, equal to the instance id
    pub name: String,

    /// Backing instance
    pub instance_id: InstanceId,

    /// Instance address
    pub ip: IpAddr,

    /// Control-plane role
    pub role: MasterRole,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ControlPlaneRecord {
    pub fn new(instance_id: InstanceId, ip: IpAddr) -> Self {
        Self {
            name: instance_id.to_string(),
            instance_id,
            ip,
            role: MasterRole::Hybrid,
            created_at: Utc::now(),
        }
    }
}

/// Control-plane member role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MasterRole {
    /// Runs both the consensus store and the API server
    #[default]
    Hybrid,
}

/// Declared control-plane replica count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterSet {
    pub desired: usize,
}

//! Events emitted by a healet for observers.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use heal_types::{InstanceId, PoolId, Role};
use serde::Serialize;

/// Result of one fix cycle or task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixOutcome {
    /// Nothing to do.
    Converged,
    /// Something was changed.
    Repaired,
    /// Admission or scaling asked to come back later.
    RequeueAfter(Duration),
}

/// Which rung of the repair ladder fixed a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairAction {
    Restart,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealEvent {
    CycleStarted {
        role: Role,
    },
    CycleFinished {
        role: Role,
        outcome: FixOutcome,
    },
    CycleFailed {
        role: Role,
        reason: String,
    },
    /// Stale control-plane registry entry deleted.
    RecordDeleted {
        name: String,
    },
    /// Missing control-plane registry entry recreated.
    RecordCreated {
        name: String,
    },
    /// Stale membership record deleted.
    NodeDeleted {
        name: String,
    },
    MemberRemoved {
        ip: IpAddr,
    },
    NodeRepaired {
        instance_id: InstanceId,
        action: RepairAction,
    },
    NodeLabeled {
        name: String,
        pool: PoolId,
    },
    ScaleStep {
        from: usize,
        to: usize,
        desired: usize,
    },
    PoolScaled {
        pool: PoolId,
        desired: usize,
    },
}

/// An event with its emission time
#[derive(Debug, Clone, Serialize)]
pub struct HealEventEnvelope {
    pub at: DateTime<Utc>,
    pub event: HealEvent,
}

impl HealEventEnvelope {
    pub fn new(event: HealEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

//! Cluster membership records
//!
//! A membership record is created by the agent running on the machine and
//! carries a readiness condition refreshed by heartbeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TypesResult;
use crate::ids::ProviderId;

/// Heartbeat-bearing record of a machine's participation in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Record name
    pub name: String,

    /// Raw provider identifier as written by the agent
    pub provider_id: String,

    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Whether scheduling onto this node is disabled
    #[serde(default)]
    pub unschedulable: bool,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl MembershipRecord {
    /// Create a record that reports ready as of now.
    pub fn new(name: impl Into<String>, provider_id: &ProviderId) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            provider_id: provider_id.to_string(),
            labels: BTreeMap::new(),
            unschedulable: false,
            conditions: vec![NodeCondition::ready(ConditionStatus::True, now)],
            created_at: now,
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Replace the ready condition
    pub fn with_ready(mut self, status: ConditionStatus, since: DateTime<Utc>) -> Self {
        self.set_ready(status, since);
        self
    }

    /// Parse the provider identifier.
    pub fn provider(&self) -> TypesResult<ProviderId> {
        ProviderId::parse(&self.provider_id)
    }

    pub fn ready_condition(&self) -> Option<&NodeCondition> {
        self.conditions
            .iter()
            .find(|c| c.kind == NodeConditionKind::Ready)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// When the record last stopped being ready, or `None` if it is ready.
    ///
    /// A record without any ready condition has never been ready and counts
    /// as unready since creation.
    pub fn unready_since(&self) -> Option<DateTime<Utc>> {
        match self.ready_condition() {
            Some(c) if c.status == ConditionStatus::True => None,
            Some(c) => Some(c.last_transition),
            None => Some(self.created_at),
        }
    }

    /// Set the ready condition, tracking the transition time.
    pub fn set_ready(&mut self, status: ConditionStatus, at: DateTime<Utc>) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.kind == NodeConditionKind::Ready)
        {
            Some(c) => {
                if c.status != status {
                    c.last_transition = at;
                }
                c.status = status;
                c.last_heartbeat = at;
            }
            None => self.conditions.push(NodeCondition::ready(status, at)),
        }
    }
}

/// A single node status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub kind: NodeConditionKind,
    pub status: ConditionStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub last_transition: DateTime<Utc>,
}

impl NodeCondition {
    pub fn ready(status: ConditionStatus, at: DateTime<Utc>) -> Self {
        Self {
            kind: NodeConditionKind::Ready,
            status,
            last_heartbeat: at,
            last_transition: at,
        }
    }
}

/// Condition kinds the engine inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeConditionKind {
    Ready,
    MemoryPressure,
    DiskPressure,
    NetworkUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

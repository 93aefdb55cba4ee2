//! Node roles and the well-known label and tag keys that encode them

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::PoolId;

/// Label keys written onto membership records
pub mod labels {
    /// Legacy control-plane role label
    pub const MASTER: &str = "node-role.kubernetes.io/master";

    /// Control-plane role label
    pub const CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";

    /// Node pool membership label
    pub const NODE_POOL: &str = "heal.io/nodepool-id";
}

/// Tag keys written onto compute instances
pub mod tags {
    /// RFC 3339 timestamp of the last repair admitted for the instance
    pub const LAST_REPAIRED: &str = "heal.io/last-repaired";
}

/// Which part of the cluster a row belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Control-plane member
    Master,

    /// Worker in the given pool
    Worker(PoolId),
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    pub fn pool(&self) -> Option<&PoolId> {
        match self {
            Role::Master => None,
            Role::Worker(pool) => Some(pool),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Worker(pool) => write!(f, "worker({})", pool),
        }
    }
}

//! Worker node pools

use serde::{Deserialize, Serialize};

use crate::ids::{PoolId, ScalingGroupId};

/// Declarative spec for a worker group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePool {
    /// Pool identifier
    pub id: PoolId,

    /// Display name
    pub name: String,

    /// Desired capacity
    pub desired: usize,

    /// Machine shape, e.g. `ecs.g6.xlarge`
    pub shape: String,

    /// Cloud resources backing the pool, `None` until provisioned
    pub bind: Option<PoolBind>,
}

impl NodePool {
    pub fn new(id: PoolId, name: impl Into<String>, desired: usize) -> Self {
        Self {
            id,
            name: name.into(),
            desired,
            shape: String::new(),
            bind: None,
        }
    }

    /// Attach the provisioned scaling group
    pub fn with_bind(mut self, bind: PoolBind) -> Self {
        self.bind = Some(bind);
        self
    }

    pub fn is_provisioned(&self) -> bool {
        self.bind.is_some()
    }
}

/// Scaling group and launch configuration ids recorded once provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBind {
    pub scaling_group_id: ScalingGroupId,
    pub scaling_config_id: String,
}

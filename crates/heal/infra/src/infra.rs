//! Scaling-group membership
//!
//! The control-plane scaling group id is an output of the cloud stack that
//! created the cluster. It is looked up once and cached on the infra object.

use async_trait::async_trait;
use heal_types::cluster::OUTPUT_MASTER_SCALING_GROUP;
use heal_types::{NodePool, ScalingGroupId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::cluster::ClusterApi;
use crate::collector::InstanceMap;
use crate::error::{InfraError, InfraResult};
use crate::provider::Provider;

/// Current compute membership of the control plane and node pools
#[async_trait]
pub trait Infra: Send + Sync {
    /// Scaling group backing the control plane.
    async fn control_plane_group(&self) -> InfraResult<ScalingGroupId>;

    async fn control_plane_ecs(&self) -> InfraResult<InstanceMap>;

    async fn node_pool_ecs(&self, pool: &NodePool) -> InfraResult<InstanceMap>;
}

/// [`Infra`] backed by scaling-group describe calls
pub struct ScalingGroupInfra {
    provider: Arc<dyn Provider>,
    cluster: Arc<dyn ClusterApi>,
    outputs: RwLock<Option<BTreeMap<String, String>>>,
}

impl ScalingGroupInfra {
    pub fn new(provider: Arc<dyn Provider>, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            provider,
            cluster,
            outputs: RwLock::new(None),
        }
    }

    async fn stack_outputs(&self) -> InfraResult<BTreeMap<String, String>> {
        if let Some(outputs) = self.outputs.read().await.as_ref() {
            return Ok(outputs.clone());
        }

        let descriptor = self.cluster.get_cluster().await?;
        let stack = descriptor
            .stack
            .as_ref()
            .ok_or_else(|| InfraError::MissingStackBinding(descriptor.name.clone()))?;

        let outputs = if stack.outputs.is_empty() {
            debug!(stack_id = %stack.stack_id, "Resolving stack outputs");
            self.provider.stack_outputs(&stack.stack_id).await?
        } else {
            stack.outputs.clone()
        };

        *self.outputs.write().await = Some(outputs.clone());
        Ok(outputs)
    }
}

#[async_trait]
impl Infra for ScalingGroupInfra {
    async fn control_plane_group(&self) -> InfraResult<ScalingGroupId> {
        let outputs = self.stack_outputs().await?;
        match outputs.get(OUTPUT_MASTER_SCALING_GROUP) {
            Some(id) => Ok(ScalingGroupId::new(id.clone())),
            None => {
                let descriptor = self.cluster.get_cluster().await?;
                Err(InfraError::MissingStackOutput {
                    stack_id: descriptor
                        .stack
                        .map(|s| s.stack_id)
                        .unwrap_or_default(),
                    key: OUTPUT_MASTER_SCALING_GROUP.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn control_plane_ecs(&self) -> InfraResult<InstanceMap> {
        let group = self.control_plane_group().await?;
        self.provider.describe_scaling_group_instances(&group).await
    }

    #[instrument(skip(self, pool), fields(pool = %pool.id))]
    async fn node_pool_ecs(&self, pool: &NodePool) -> InfraResult<InstanceMap> {
        let bind = pool
            .bind
            .as_ref()
            .ok_or_else(|| InfraError::NotProvisioned(pool.id.clone()))?;
        self.provider
            .describe_scaling_group_instances(&bind.scaling_group_id)
            .await
    }
}

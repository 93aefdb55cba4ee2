//! State collection
//!
//! Gathers the raw views a reconciliation snapshot is built from. Nothing is
//! cached here; every call goes to the collaborator.

use async_trait::async_trait;
use heal_types::{
    labels, ClusterDescriptor, ComputeInstance, ControlPlaneRecord, InstanceId, MembershipRecord,
    NodePool,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::cluster::ClusterApi;
use crate::error::InfraResult;
use crate::infra::Infra;

/// Compute instances keyed by id
pub type InstanceMap = BTreeMap<InstanceId, ComputeInstance>;

/// Source of the three membership views
#[async_trait]
pub trait StateCollector: Send + Sync {
    async fn get_cluster_item(&self) -> InfraResult<ClusterDescriptor>;

    /// Membership records of control-plane machines.
    async fn get_master_node_list(&self) -> InfraResult<Vec<MembershipRecord>>;

    /// Membership records of the pool's machines.
    async fn get_worker_node_list(&self, pool: &NodePool) -> InfraResult<Vec<MembershipRecord>>;

    async fn get_master_cr(&self) -> InfraResult<Vec<ControlPlaneRecord>>;

    async fn get_control_plane_ecs(&self) -> InfraResult<InstanceMap>;

    async fn get_node_pool_ecs(&self, pool: &NodePool) -> InfraResult<InstanceMap>;
}

/// [`StateCollector`] over a cluster API and scaling-group infra
#[derive(Clone)]
pub struct ClusterStateCollector {
    cluster: Arc<dyn ClusterApi>,
    infra: Arc<dyn Infra>,
}

impl ClusterStateCollector {
    pub fn new(cluster: Arc<dyn ClusterApi>, infra: Arc<dyn Infra>) -> Self {
        Self { cluster, infra }
    }
}

fn is_master_labelled(node: &MembershipRecord) -> bool {
    node.labels.contains_key(labels::MASTER) || node.labels.contains_key(labels::CONTROL_PLANE)
}

/// Whether the record's provider id names one of `instances`.
///
/// Records with an unparseable provider id match nothing.
fn backed_by(node: &MembershipRecord, instances: &InstanceMap) -> bool {
    match node.provider() {
        Ok(provider) => instances.contains_key(provider.instance()),
        Err(e) => {
            warn!(node = %node.name, error = %e, "Skipping record with malformed provider id");
            false
        }
    }
}

#[async_trait]
impl StateCollector for ClusterStateCollector {
    async fn get_cluster_item(&self) -> InfraResult<ClusterDescriptor> {
        self.cluster.get_cluster().await
    }

    async fn get_master_node_list(&self) -> InfraResult<Vec<MembershipRecord>> {
        let instances = self.infra.control_plane_ecs().await?;
        let nodes = self.cluster.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(|n| is_master_labelled(n) || backed_by(n, &instances))
            .collect())
    }

    async fn get_worker_node_list(&self, pool: &NodePool) -> InfraResult<Vec<MembershipRecord>> {
        let instances = self.infra.node_pool_ecs(pool).await?;
        let nodes = self.cluster.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(|n| !is_master_labelled(n))
            .filter(|n| {
                n.labels.get(labels::NODE_POOL).map(String::as_str) == Some(pool.id.as_str())
                    || backed_by(n, &instances)
            })
            .collect())
    }

    async fn get_master_cr(&self) -> InfraResult<Vec<ControlPlaneRecord>> {
        self.cluster.list_masters().await
    }

    async fn get_control_plane_ecs(&self) -> InfraResult<InstanceMap> {
        self.infra.control_plane_ecs().await
    }

    async fn get_node_pool_ecs(&self, pool: &NodePool) -> InfraResult<InstanceMap> {
        self.infra.node_pool_ecs(pool).await
    }
}

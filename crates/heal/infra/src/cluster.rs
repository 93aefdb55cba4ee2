//! Cluster API contract
//!
//! Typed get/list/patch access to the declarative cluster resources. The
//! store is the source of truth and handles concurrent writers itself; the
//! engine makes a single patch attempt per mutation.

use async_trait::async_trait;
use heal_types::{
    ClusterDescriptor, ControlPlaneRecord, MasterSet, MembershipRecord, NodePool, PoolId,
};

use crate::error::InfraResult;

/// Mutation applied to a membership record by [`ClusterApi::patch_node`].
pub type NodeMutation = Box<dyn FnOnce(&mut MembershipRecord) + Send>;

/// Declarative cluster resources
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// The cluster descriptor.
    async fn get_cluster(&self) -> InfraResult<ClusterDescriptor>;

    /// All control-plane registry entries.
    async fn list_masters(&self) -> InfraResult<Vec<ControlPlaneRecord>>;

    async fn create_master(&self, record: ControlPlaneRecord) -> InfraResult<()>;

    async fn delete_master(&self, name: &str) -> InfraResult<()>;

    /// Declared control-plane replica count.
    async fn get_master_set(&self) -> InfraResult<MasterSet>;

    async fn list_node_pools(&self) -> InfraResult<Vec<NodePool>>;

    async fn get_node_pool(&self, id: &PoolId) -> InfraResult<NodePool>;

    /// All membership records regardless of role.
    async fn list_nodes(&self) -> InfraResult<Vec<MembershipRecord>>;

    async fn get_node(&self, name: &str) -> InfraResult<MembershipRecord>;

    async fn delete_node(&self, name: &str) -> InfraResult<()>;

    /// Apply `mutation` to the current record and store the result.
    async fn patch_node(&self, name: &str, mutation: NodeMutation)
        -> InfraResult<MembershipRecord>;

    /// Evict all workloads from a node, returning how many were evicted.
    async fn evict_pods(&self, name: &str) -> InfraResult<usize>;
}

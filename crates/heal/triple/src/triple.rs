//! Snapshot construction and diff queries

use heal_infra::{InstanceMap, StateCollector};
use heal_types::{
    ClusterDescriptor, ConsensusMember, ControlPlaneRecord, MembershipRecord, NodePool, ProviderId,
    Role,
};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, instrument, warn};

use crate::error::{TripleError, TripleResult};
use crate::info::NodeInfo;

/// Correlated three-view snapshot for one role
#[derive(Debug, Clone)]
pub struct Triple {
    role: Role,
    cluster: ClusterDescriptor,
    rows: Vec<NodeInfo>,
    skipped: Vec<MembershipRecord>,
}

impl Triple {
    /// Snapshot of the control plane.
    #[instrument(skip(collector))]
    pub async fn master(collector: &dyn StateCollector) -> TripleResult<Self> {
        let cluster = collector
            .get_cluster_item()
            .await
            .map_err(TripleError::collect("cluster"))?;
        let masters = collector
            .get_master_cr()
            .await
            .map_err(TripleError::collect("masters"))?;
        let nodes = collector
            .get_master_node_list()
            .await
            .map_err(TripleError::collect("nodes"))?;
        let instances = collector
            .get_control_plane_ecs()
            .await
            .map_err(TripleError::collect("instances"))?;

        Ok(Self::build(Role::Master, cluster, instances, masters, nodes))
    }

    /// Snapshot of one worker pool. Worker rows never carry a registry entry.
    #[instrument(skip(collector, pool), fields(pool = %pool.id))]
    pub async fn worker(collector: &dyn StateCollector, pool: &NodePool) -> TripleResult<Self> {
        let cluster = collector
            .get_cluster_item()
            .await
            .map_err(TripleError::collect("cluster"))?;
        let nodes = collector
            .get_worker_node_list(pool)
            .await
            .map_err(TripleError::collect("nodes"))?;
        let instances = collector
            .get_node_pool_ecs(pool)
            .await
            .map_err(TripleError::collect("instances"))?;

        Ok(Self::build(
            Role::Worker(pool.id.clone()),
            cluster,
            instances,
            Vec::new(),
            nodes,
        ))
    }

    /// Correlate the raw views.
    ///
    /// Rows are emitted instance-first, then for unmatched registry entries,
    /// then for unmatched membership records. Records whose provider id does
    /// not parse cannot be correlated and are set aside in [`Triple::skipped`].
    pub fn build(
        role: Role,
        cluster: ClusterDescriptor,
        instances: InstanceMap,
        masters: Vec<ControlPlaneRecord>,
        nodes: Vec<MembershipRecord>,
    ) -> Self {
        let mut skipped = Vec::new();
        let mut parsed: Vec<(ProviderId, MembershipRecord)> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node.provider() {
                Ok(provider) => parsed.push((provider, node)),
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Skipping record with malformed provider id");
                    skipped.push(node);
                }
            }
        }

        let mut masters: Vec<Option<ControlPlaneRecord>> = masters.into_iter().map(Some).collect();
        let mut nodes: Vec<Option<(ProviderId, MembershipRecord)>> =
            parsed.into_iter().map(Some).collect();

        let mut rows = Vec::new();

        for (id, instance) in instances {
            let resource = take_first(&mut masters, |m| m.instance_id == id);
            let node = take_first(&mut nodes, |(p, _)| p.matches(&id)).map(|(_, n)| n);
            rows.push(NodeInfo {
                role: role.clone(),
                instance: Some(instance),
                node,
                resource,
            });
        }

        for resource in masters.into_iter().flatten() {
            let node = take_first(&mut nodes, |(p, _)| p.matches(&resource.instance_id))
                .map(|(_, n)| n);
            rows.push(NodeInfo {
                role: role.clone(),
                instance: None,
                node,
                resource: Some(resource),
            });
        }

        for (_, node) in nodes.into_iter().flatten() {
            rows.push(NodeInfo {
                role: role.clone(),
                instance: None,
                node: Some(node),
                resource: None,
            });
        }

        debug!(role = %role, rows = rows.len(), skipped = skipped.len(), "Built triple");

        Self {
            role,
            cluster,
            rows,
            skipped,
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn cluster(&self) -> &ClusterDescriptor {
        &self.cluster
    }

    pub fn rows(&self) -> &[NodeInfo] {
        &self.rows
    }

    /// Membership records that could not be correlated.
    pub fn skipped(&self) -> &[MembershipRecord] {
        &self.skipped
    }

    /// Number of live instances in the snapshot.
    pub fn instance_count(&self) -> usize {
        self.rows.iter().filter(|r| r.instance.is_some()).count()
    }

    /// `(addition, deletion)`: instances without a membership record, and
    /// membership records without an instance.
    pub fn instance_node_diff(&self) -> (Vec<&NodeInfo>, Vec<&NodeInfo>) {
        let addition = self
            .rows
            .iter()
            .filter(|r| r.instance.is_some() && r.node.is_none())
            .collect();
        let deletion = self
            .rows
            .iter()
            .filter(|r| r.node.is_some() && r.instance.is_none())
            .collect();
        (addition, deletion)
    }

    /// `(to_delete, missing)`: registry entries without an instance, and
    /// membership records without a registry entry. Always empty for a
    /// worker snapshot.
    pub fn master_crd_diff(&self) -> (Vec<&NodeInfo>, Vec<&NodeInfo>) {
        if !self.role.is_master() {
            return (Vec::new(), Vec::new());
        }
        let to_delete = self
            .rows
            .iter()
            .filter(|r| r.resource.is_some() && r.instance.is_none())
            .collect();
        let missing = self
            .rows
            .iter()
            .filter(|r| r.node.is_some() && r.resource.is_none())
            .collect();
        (to_delete, missing)
    }

    /// Consensus members whose address matches no instance.
    ///
    /// Refuses to remove more than half of the members in one pass and
    /// returns nothing instead: a reading where most of the control plane
    /// vanished is more likely wrong than true.
    pub fn etcd_mem_diff(&self, members: &[ConsensusMember]) -> Vec<ConsensusMember> {
        let live: BTreeSet<IpAddr> = self
            .rows
            .iter()
            .filter_map(|r| r.instance.as_ref().map(|i| i.ip))
            .collect();

        let deletions: Vec<ConsensusMember> = members
            .iter()
            .filter(|m| !live.contains(&m.ip))
            .cloned()
            .collect();

        if deletions.len() * 2 > members.len() {
            warn!(
                members = members.len(),
                deletions = deletions.len(),
                "Refusing to remove a majority of consensus members, waiting for next cycle"
            );
            return Vec::new();
        }
        deletions
    }

    /// Rows whose instance and membership record both exist but the record
    /// is not ready.
    pub fn unready_node_list(&self) -> Vec<&NodeInfo> {
        self.rows
            .iter()
            .filter(|r| r.instance.is_some())
            .filter(|r| r.node.as_ref().map(|n| !n.is_ready()).unwrap_or(false))
            .collect()
    }

    /// Whether every view agrees and every record is ready.
    pub fn system_in_consistency(&self) -> bool {
        let (addition, deletion) = self.instance_node_diff();
        let (to_delete, missing) = self.master_crd_diff();
        self.unready_node_list().is_empty()
            && addition.is_empty()
            && deletion.is_empty()
            && to_delete.is_empty()
            && missing.is_empty()
    }
}

/// Remove and return the first element satisfying `pred`.
fn take_first<T>(items: &mut [Option<T>], pred: impl Fn(&T) -> bool) -> Option<T> {
    items
        .iter_mut()
        .find(|slot| slot.as_ref().map(&pred).unwrap_or(false))
        .and_then(Option::take)
}

//! In-memory cluster API

use async_trait::async_trait;
use chrono::Utc;
use heal_types::{
    ClusterDescriptor, ConditionStatus, ControlPlaneRecord, MasterSet, MembershipRecord, NodePool,
    PoolId, ProviderId,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::Journal;
use crate::cluster::{ClusterApi, NodeMutation};
use crate::error::{InfraError, InfraResult};

/// In-memory cluster resources
#[derive(Debug)]
pub struct InMemoryClusterApi {
    cluster: RwLock<ClusterDescriptor>,
    masters: RwLock<BTreeMap<String, ControlPlaneRecord>>,
    master_set: RwLock<Option<MasterSet>>,
    pools: RwLock<BTreeMap<PoolId, NodePool>>,
    nodes: RwLock<BTreeMap<String, MembershipRecord>>,
    workloads: RwLock<BTreeMap<String, usize>>,
    journal: Journal,
}

impl InMemoryClusterApi {
    pub fn new(cluster: ClusterDescriptor) -> Self {
        Self {
            cluster: RwLock::new(cluster),
            masters: RwLock::new(BTreeMap::new()),
            master_set: RwLock::new(None),
            pools: RwLock::new(BTreeMap::new()),
            nodes: RwLock::new(BTreeMap::new()),
            workloads: RwLock::new(BTreeMap::new()),
            journal: Journal::new(),
        }
    }

    /// Record mutating calls into a shared journal
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub async fn insert_node(&self, node: MembershipRecord) {
        self.nodes.write().await.insert(node.name.clone(), node);
    }

    pub async fn insert_master(&self, record: ControlPlaneRecord) {
        self.masters.write().await.insert(record.name.clone(), record);
    }

    pub async fn insert_pool(&self, pool: NodePool) {
        self.pools.write().await.insert(pool.id.clone(), pool);
    }

    pub async fn set_master_set(&self, desired: usize) {
        *self.master_set.write().await = Some(MasterSet { desired });
    }

    pub async fn set_workloads(&self, name: &str, count: usize) {
        self.workloads.write().await.insert(name.to_string(), count);
    }

    pub async fn node(&self, name: &str) -> Option<MembershipRecord> {
        self.nodes.read().await.get(name).cloned()
    }

    pub async fn nodes(&self) -> Vec<MembershipRecord> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn masters(&self) -> Vec<ControlPlaneRecord> {
        self.masters.read().await.values().cloned().collect()
    }

    /// Set the ready condition of a record, as its agent would.
    pub async fn heartbeat(&self, name: &str, status: ConditionStatus) -> InfraResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| InfraError::not_found("node", name))?;
        node.set_ready(status, Utc::now());
        Ok(())
    }

    /// Report a ready heartbeat for the machine, registering a record named
    /// after the instance if none exists yet.
    pub async fn agent_heartbeat(&self, provider: &ProviderId) {
        let mut nodes = self.nodes.write().await;
        let existing = nodes.values_mut().find(|n| {
            n.provider()
                .map(|p| p.instance() == provider.instance())
                .unwrap_or(false)
        });
        match existing {
            Some(node) => node.set_ready(ConditionStatus::True, Utc::now()),
            None => {
                let name = provider.instance().to_string();
                nodes.insert(name.clone(), MembershipRecord::new(name, provider));
            }
        }
    }
}

#[async_trait]
impl ClusterApi for InMemoryClusterApi {
    async fn get_cluster(&self) -> InfraResult<ClusterDescriptor> {
        Ok(self.cluster.read().await.clone())
    }

    async fn list_masters(&self) -> InfraResult<Vec<ControlPlaneRecord>> {
        Ok(self.masters().await)
    }

    async fn create_master(&self, record: ControlPlaneRecord) -> InfraResult<()> {
        let mut masters = self.masters.write().await;
        if masters.contains_key(&record.name) {
            return Err(InfraError::AlreadyExists {
                kind: "master",
                name: record.name,
            });
        }
        self.journal
            .record(format!("cluster.create_master {}", record.name))
            .await;
        masters.insert(record.name.clone(), record);
        Ok(())
    }

    async fn delete_master(&self, name: &str) -> InfraResult<()> {
        self.masters
            .write()
            .await
            .remove(name)
            .ok_or_else(|| InfraError::not_found("master", name))?;
        self.journal
            .record(format!("cluster.delete_master {}", name))
            .await;
        Ok(())
    }

    async fn get_master_set(&self) -> InfraResult<MasterSet> {
        let master_set = *self.master_set.read().await;
        master_set.ok_or_else(|| InfraError::not_found("masterset", "default"))
    }

    async fn list_node_pools(&self) -> InfraResult<Vec<NodePool>> {
        Ok(self.pools.read().await.values().cloned().collect())
    }

    async fn get_node_pool(&self, id: &PoolId) -> InfraResult<NodePool> {
        self.pools
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| InfraError::not_found("nodepool", id.as_str()))
    }

    async fn list_nodes(&self) -> InfraResult<Vec<MembershipRecord>> {
        Ok(self.nodes().await)
    }

    async fn get_node(&self, name: &str) -> InfraResult<MembershipRecord> {
        self.node(name)
            .await
            .ok_or_else(|| InfraError::not_found("node", name))
    }

    async fn delete_node(&self, name: &str) -> InfraResult<()> {
        self.nodes
            .write()
            .await
            .remove(name)
            .ok_or_else(|| InfraError::not_found("node", name))?;
        self.journal
            .record(format!("cluster.delete_node {}", name))
            .await;
        Ok(())
    }

    async fn patch_node(
        &self,
        name: &str,
        mutation: NodeMutation,
    ) -> InfraResult<MembershipRecord> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| InfraError::not_found("node", name))?;
        let mut patched = node.clone();
        mutation(&mut patched);
        *node = patched.clone();
        self.journal
            .record(format!("cluster.patch_node {}", name))
            .await;
        Ok(patched)
    }

    async fn evict_pods(&self, name: &str) -> InfraResult<usize> {
        if !self.nodes.read().await.contains_key(name) {
            return Err(InfraError::not_found("node", name));
        }
        let evicted = self
            .workloads
            .write()
            .await
            .insert(name.to_string(), 0)
            .unwrap_or(0);
        self.journal
            .record(format!("cluster.evict_pods {}", name))
            .await;
        Ok(evicted)
    }
}

//! Simulated fleet backend
//!
//! Seeds the in-memory cluster API, provider and consensus store with a
//! consistent control plane and the configured worker pools.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use heal_infra::memory::{InMemoryClusterApi, InMemoryConsensus, InMemoryProvider, Journal};
use heal_infra::HealContext;
use heal_types::cluster::OUTPUT_MASTER_SCALING_GROUP;
use heal_types::{
    labels, ClusterDescriptor, ComputeInstance, ConditionStatus, ConsensusMember,
    ConsensusMemberId, ControlPlaneRecord, InstanceId, MembershipRecord, NodePool, PoolBind,
    PoolId, ProviderId, ScalingGroupId, StackBinding,
};
use tracing::info;

use crate::config::{BackendConfig, ClusterConfig, PoolSeed};
use crate::error::{DaemonError, DaemonResult};

/// Handles on the simulated collaborators
#[derive(Clone)]
pub struct MemoryBackend {
    pub cluster: Arc<InMemoryClusterApi>,
    pub provider: Arc<InMemoryProvider>,
    pub consensus: Arc<InMemoryConsensus>,
    pub journal: Journal,
}

impl MemoryBackend {
    /// Build and seed a fleet.
    pub async fn seed(cluster: &ClusterConfig, backend: &BackendConfig) -> DaemonResult<Self> {
        if backend.masters == 0 || backend.masters > 250 {
            return Err(DaemonError::Seed(format!(
                "masters must be between 1 and 250, got {}",
                backend.masters
            )));
        }
        if backend.unready_masters > backend.masters {
            return Err(DaemonError::Seed(format!(
                "{} unready masters out of {}",
                backend.unready_masters, backend.masters
            )));
        }

        let master_group = ScalingGroupId::new(format!("asg-{}-master", cluster.name));
        let mut stack = StackBinding::new(format!("stack-{}", cluster.name));
        stack.outputs.insert(
            OUTPUT_MASTER_SCALING_GROUP.to_string(),
            master_group.as_str().to_string(),
        );
        let mut descriptor =
            ClusterDescriptor::new(cluster.name.clone(), cluster.region.clone()).with_stack(stack);
        descriptor
            .endpoints
            .push(format!("https://{}.{}.internal:6443", cluster.name, cluster.region));

        let journal = Journal::new();
        let cluster_api =
            Arc::new(InMemoryClusterApi::new(descriptor).with_journal(journal.clone()));
        let provider = Arc::new(
            InMemoryProvider::new(cluster.region.clone())
                .with_agent(cluster_api.clone())
                .with_journal(journal.clone()),
        );
        let consensus = Arc::new(InMemoryConsensus::new().with_journal(journal.clone()));

        let booted = Utc::now() - ChronoDuration::hours(1);
        let stale = Utc::now() - ChronoDuration::minutes(10);
        let first_unready = backend.masters - backend.unready_masters;

        for n in 0..backend.masters {
            let id = InstanceId::new(format!("i-{}-m{}", cluster.name, n + 1));
            let ip = IpAddr::from([10, 0, 0, (n + 1) as u8]);
            provider
                .add_instance(
                    &master_group,
                    ComputeInstance::new(id.clone(), ip).created_at(booted),
                )
                .await;
            cluster_api
                .insert_master(ControlPlaneRecord::new(id.clone(), ip))
                .await;

            let mut record =
                MembershipRecord::new(id.to_string(), &ProviderId::new(&cluster.region, id))
                    .with_label(labels::MASTER, "")
                    .with_label(labels::CONTROL_PLANE, "");
            if n >= first_unready {
                record = record.with_ready(ConditionStatus::Unknown, stale);
            }
            cluster_api.insert_node(record).await;

            consensus
                .add_member(ConsensusMember {
                    id: ConsensusMemberId::new(n as u64 + 1),
                    name: format!("etcd-{}", n + 1),
                    ip,
                })
                .await;
        }

        cluster_api.set_master_set(backend.masters).await;

        for (p, seed) in backend.pools.iter().enumerate() {
            seed_pool(&cluster_api, &provider, &cluster.region, p, seed, booted).await?;
        }

        info!(
            cluster = %cluster.name,
            masters = backend.masters,
            pools = backend.pools.len(),
            "Seeded in-memory fleet"
        );

        Ok(Self {
            cluster: cluster_api,
            provider,
            consensus,
            journal,
        })
    }

    /// Collaborator bundle for a healet
    pub fn context(&self) -> HealContext {
        HealContext::new(
            self.cluster.clone(),
            self.provider.clone(),
            self.consensus.clone(),
        )
    }
}

async fn seed_pool(
    cluster_api: &InMemoryClusterApi,
    provider: &InMemoryProvider,
    region: &str,
    index: usize,
    seed: &PoolSeed,
    booted: DateTime<Utc>,
) -> DaemonResult<()> {
    if index >= 250 || seed.size > 250 {
        return Err(DaemonError::Seed(format!(
            "pool {} does not fit the simulated address plan",
            seed.id
        )));
    }

    let pool_id = PoolId::new(seed.id.clone());
    let group = ScalingGroupId::new(format!("asg-{}", seed.id));
    cluster_api
        .insert_pool(
            NodePool::new(pool_id.clone(), seed.name.clone(), seed.size).with_bind(PoolBind {
                scaling_group_id: group.clone(),
                scaling_config_id: format!("scfg-{}", seed.id),
            }),
        )
        .await;

    for n in 0..seed.size {
        let id = InstanceId::new(format!("i-{}-{}", seed.id, n + 1));
        let ip = IpAddr::from([10, 1 + index as u8, 0, (n + 1) as u8]);
        provider
            .add_instance(&group, ComputeInstance::new(id.clone(), ip).created_at(booted))
            .await;
        cluster_api
            .insert_node(
                MembershipRecord::new(format!("{}-{}", seed.name, n + 1), &ProviderId::new(region, id))
                    .with_label(labels::NODE_POOL, pool_id.as_str()),
            )
            .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_infra::{ClusterApi, Infra, StateCollector};

    fn cluster() -> ClusterConfig {
        ClusterConfig::default()
    }

    #[tokio::test]
    async fn test_seed_builds_consistent_control_plane() {
        let backend = MemoryBackend::seed(&cluster(), &BackendConfig::default())
            .await
            .unwrap();
        let ctx = backend.context();

        assert_eq!(ctx.infra.control_plane_ecs().await.unwrap().len(), 3);
        assert_eq!(backend.cluster.masters().await.len(), 3);
        assert_eq!(backend.consensus.members().await.len(), 3);
        assert_eq!(ctx.collector().get_master_node_list().await.unwrap().len(), 3);
        assert!(backend.cluster.nodes().await.iter().all(|n| n.is_ready()));
        assert_eq!(backend.cluster.get_master_set().await.unwrap().desired, 3);
    }

    #[tokio::test]
    async fn test_seed_binds_pools() {
        let backend = MemoryBackend::seed(&cluster(), &BackendConfig::default())
            .await
            .unwrap();
        let ctx = backend.context();
        let pool = ctx
            .cluster
            .get_node_pool(&PoolId::new("np-default"))
            .await
            .unwrap();

        assert!(pool.is_provisioned());
        assert_eq!(ctx.infra.node_pool_ecs(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unready_masters_are_stale() {
        let config = BackendConfig {
            unready_masters: 1,
            ..Default::default()
        };
        let backend = MemoryBackend::seed(&cluster(), &config).await.unwrap();

        let unready: Vec<_> = backend
            .cluster
            .nodes()
            .await
            .into_iter()
            .filter(|n| !n.is_ready())
            .map(|n| n.name)
            .collect();
        assert_eq!(unready, vec!["i-local-m3"]);
    }

    #[tokio::test]
    async fn test_invalid_seed_is_rejected() {
        let config = BackendConfig {
            masters: 1,
            unready_masters: 2,
            ..Default::default()
        };
        assert!(matches!(
            MemoryBackend::seed(&cluster(), &config).await,
            Err(DaemonError::Seed(_))
        ));
    }
}

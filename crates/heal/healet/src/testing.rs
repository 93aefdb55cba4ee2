//! Simulated control plane for tests.
//!
//! Compiled for this crate's own tests and, with the `test-utils` feature,
//! for integration tests and downstream crates.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use heal_infra::memory::{InMemoryClusterApi, InMemoryConsensus, InMemoryProvider, Journal};
use heal_infra::HealContext;
use heal_types::cluster::OUTPUT_MASTER_SCALING_GROUP;
use heal_types::{
    labels, ClusterDescriptor, ComputeInstance, ConsensusMember, ConsensusMemberId,
    ControlPlaneRecord, InstanceId, MembershipRecord, ProviderId, ScalingGroupId, StackBinding,
};

use crate::{Healet, HealetConfig};

pub const REGION: &str = "cn-hangzhou";

pub struct Fleet {
    pub cluster: Arc<InMemoryClusterApi>,
    pub provider: Arc<InMemoryProvider>,
    pub consensus: Arc<InMemoryConsensus>,
    pub journal: Journal,
    pub ctx: HealContext,
}

pub fn ip(n: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, n])
}

pub fn id(n: u8) -> InstanceId {
    InstanceId::new(format!("i-{}", n))
}

pub fn group() -> ScalingGroupId {
    ScalingGroupId::new("asg-m")
}

pub fn machine(n: u8) -> ComputeInstance {
    ComputeInstance::new(id(n), ip(n)).created_at(Utc::now() - ChronoDuration::hours(1))
}

pub fn node(n: u8) -> MembershipRecord {
    MembershipRecord::new(format!("node{}", n), &ProviderId::new(REGION, id(n)))
        .with_label(labels::MASTER, "")
}

pub fn member(n: u8) -> ConsensusMember {
    ConsensusMember {
        id: ConsensusMemberId::new(n as u64),
        name: format!("etcd-{}", n),
        ip: ip(n),
    }
}

/// Collaborators sharing one journal, with no machines yet.
pub fn empty_fleet() -> Fleet {
    let mut stack = StackBinding::new("stack-1");
    stack
        .outputs
        .insert(OUTPUT_MASTER_SCALING_GROUP.to_string(), "asg-m".to_string());
    let descriptor = ClusterDescriptor::new("prod", REGION).with_stack(stack);

    let journal = Journal::new();
    let cluster = Arc::new(InMemoryClusterApi::new(descriptor).with_journal(journal.clone()));
    let provider = Arc::new(
        InMemoryProvider::new(REGION)
            .with_agent(cluster.clone())
            .with_journal(journal.clone()),
    );
    let consensus = Arc::new(InMemoryConsensus::new().with_journal(journal.clone()));

    let ctx = HealContext::new(cluster.clone(), provider.clone(), consensus.clone());
    Fleet {
        cluster,
        provider,
        consensus,
        journal,
        ctx,
    }
}

/// A healthy control plane of the given machines.
pub async fn fleet(machines: &[u8]) -> Fleet {
    let f = empty_fleet();
    for &n in machines {
        f.provider.add_instance(&group(), machine(n)).await;
        f.cluster
            .insert_master(ControlPlaneRecord::new(id(n), ip(n)))
            .await;
        f.cluster.insert_node(node(n)).await;
        f.consensus.add_member(member(n)).await;
    }
    f
}

pub fn healet(fleet: &Fleet) -> Healet {
    Healet::new(fleet.ctx.clone(), HealetConfig::default())
}

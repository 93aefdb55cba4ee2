//! In-memory consensus store

use async_trait::async_trait;
use heal_types::{ConsensusMember, ConsensusMemberId, EndpointStatus};
use std::collections::BTreeSet;
use tokio::sync::RwLock;

use super::Journal;
use crate::consensus::ConsensusClient;
use crate::error::{InfraError, InfraResult};

/// In-memory consensus membership
#[derive(Debug, Default)]
pub struct InMemoryConsensus {
    members: RwLock<Vec<ConsensusMember>>,
    leader: RwLock<Option<ConsensusMemberId>>,
    unhealthy: RwLock<BTreeSet<ConsensusMemberId>>,
    removed: RwLock<Vec<ConsensusMember>>,
    journal: Journal,
}

impl InMemoryConsensus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record mutating calls into a shared journal
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Add a member; the first member added becomes leader.
    pub async fn add_member(&self, member: ConsensusMember) {
        let mut members = self.members.write().await;
        let mut leader = self.leader.write().await;
        if leader.is_none() {
            *leader = Some(member.id);
        }
        members.push(member);
    }

    pub async fn set_leader(&self, id: ConsensusMemberId) {
        *self.leader.write().await = Some(id);
    }

    pub async fn set_unhealthy(&self, id: ConsensusMemberId) {
        self.unhealthy.write().await.insert(id);
    }

    pub async fn members(&self) -> Vec<ConsensusMember> {
        self.members.read().await.clone()
    }

    pub async fn removed(&self) -> Vec<ConsensusMember> {
        self.removed.read().await.clone()
    }
}

#[async_trait]
impl ConsensusClient for InMemoryConsensus {
    async fn member_list(&self) -> InfraResult<Vec<ConsensusMember>> {
        Ok(self.members().await)
    }

    async fn remove_member(&self, member: &ConsensusMember) -> InfraResult<()> {
        let mut members = self.members.write().await;
        let index = members
            .iter()
            .position(|m| m.id == member.id)
            .ok_or_else(|| InfraError::not_found("member", member.id.to_string()))?;
        let removed = members.remove(index);

        let mut leader = self.leader.write().await;
        if *leader == Some(removed.id) {
            *leader = members.first().map(|m| m.id);
        }

        self.journal
            .record(format!("consensus.remove_member {}", removed.ip))
            .await;
        self.removed.write().await.push(removed);
        Ok(())
    }

    async fn endpoints(&self) -> InfraResult<Vec<EndpointStatus>> {
        let leader = *self.leader.read().await;
        let unhealthy = self.unhealthy.read().await;
        Ok(self
            .members
            .read()
            .await
            .iter()
            .map(|m| EndpointStatus {
                endpoint: format!("https://{}:2379", m.ip),
                member: m.id,
                leader: leader == Some(m.id),
                healthy: !unhealthy.contains(&m.id),
                db_size: 0,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, ip: &str) -> ConsensusMember {
        ConsensusMember {
            id: ConsensusMemberId::new(id),
            name: format!("etcd-{}", id),
            ip: ip.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_removing_leader_elects_next_member() {
        let consensus = InMemoryConsensus::new();
        consensus.add_member(member(1, "10.0.0.1")).await;
        consensus.add_member(member(2, "10.0.0.2")).await;

        consensus.remove_member(&member(1, "10.0.0.1")).await.unwrap();

        let endpoints = consensus.endpoints().await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints[0].leader);
        assert_eq!(consensus.removed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_endpoint_is_reported() {
        let consensus = InMemoryConsensus::new();
        consensus.add_member(member(1, "10.0.0.1")).await;
        consensus.set_unhealthy(ConsensusMemberId::new(1)).await;

        let endpoints = consensus.endpoints().await.unwrap();
        assert!(!endpoints[0].healthy);
    }
}

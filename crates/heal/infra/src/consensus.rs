//! Consensus store contract

use async_trait::async_trait;
use heal_types::{ConsensusMember, EndpointStatus};

use crate::error::InfraResult;

/// Membership management for the store backing the control plane
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn member_list(&self) -> InfraResult<Vec<ConsensusMember>>;

    async fn remove_member(&self, member: &ConsensusMember) -> InfraResult<()>;

    /// Status of every reachable endpoint.
    async fn endpoints(&self) -> InfraResult<Vec<EndpointStatus>>;
}

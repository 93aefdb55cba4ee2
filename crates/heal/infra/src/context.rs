//! Collaborator handles shared by the engine
//!
//! Passed explicitly into every component constructor; there is no global
//! provider registry.

use std::sync::Arc;

use crate::cluster::ClusterApi;
use crate::collector::ClusterStateCollector;
use crate::consensus::ConsensusClient;
use crate::infra::{Infra, ScalingGroupInfra};
use crate::provider::Provider;

/// Typed bundle of collaborator clients
#[derive(Clone)]
pub struct HealContext {
    /// Declarative cluster resources
    pub cluster: Arc<dyn ClusterApi>,
    /// Cloud provider
    pub provider: Arc<dyn Provider>,
    /// Consensus store
    pub consensus: Arc<dyn ConsensusClient>,
    /// Scaling-group membership
    pub infra: Arc<dyn Infra>,
}

impl HealContext {
    /// Create a context whose infra is derived from the provider.
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        provider: Arc<dyn Provider>,
        consensus: Arc<dyn ConsensusClient>,
    ) -> Self {
        let infra = Arc::new(ScalingGroupInfra::new(provider.clone(), cluster.clone()));
        Self {
            cluster,
            provider,
            consensus,
            infra,
        }
    }

    /// Override the infra implementation
    pub fn with_infra(mut self, infra: Arc<dyn Infra>) -> Self {
        self.infra = infra;
        self
    }

    /// State collector over this context's cluster API and infra.
    pub fn collector(&self) -> ClusterStateCollector {
        ClusterStateCollector::new(self.cluster.clone(), self.infra.clone())
    }
}

//! In-memory collaborators for development and testing
//!
//! The provider can be attached to an [`InMemoryClusterApi`] to simulate the
//! membership agent: restarts and disk replacements produce a fresh
//! heartbeat unless the instance is configured not to recover.

mod cluster;
mod consensus;
mod provider;

pub use cluster::InMemoryClusterApi;
pub use consensus::InMemoryConsensus;
pub use provider::{AgentBehavior, InMemoryProvider, ProviderCall};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered log of mutating calls shared across in-memory backends
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<RwLock<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, entry: impl Into<String>) {
        self.entries.write().await.push(entry.into());
    }

    pub async fn entries(&self) -> Vec<String> {
        self.entries.read().await.clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub async fn position(&self, prefix: &str) -> Option<usize> {
        self.entries
            .read()
            .await
            .iter()
            .position(|e| e.starts_with(prefix))
    }
}

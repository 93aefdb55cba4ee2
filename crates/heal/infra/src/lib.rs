//! HEAL Infra - Contracts for the systems the healing engine talks to
//!
//! The engine never talks to a cloud SDK, consensus store or cluster API
//! directly. Every collaborator sits behind a trait:
//! - [`Provider`]: blocking cloud calls (describe, restart, replace disk, tag, scale)
//! - [`Infra`]: scaling-group membership for the control plane and node pools
//! - [`ConsensusClient`]: list and remove consensus members
//! - [`ClusterApi`]: typed access to declarative cluster resources
//! - [`StateCollector`]: the raw views a reconciliation snapshot is built from
//!
//! [`memory`] provides deterministic in-memory implementations used by tests
//! and by the daemon's simulated backend.

pub mod cluster;
pub mod collector;
pub mod consensus;
pub mod context;
pub mod error;
pub mod infra;
pub mod memory;
pub mod provider;

pub use cluster::{ClusterApi, NodeMutation};
pub use collector::{ClusterStateCollector, InstanceMap, StateCollector};
pub use consensus::ConsensusClient;
pub use context::HealContext;
pub use error::{InfraError, InfraResult};
pub use infra::{Infra, ScalingGroupInfra};
pub use provider::{CommandResult, Provider, ReplaceDiskOptions};

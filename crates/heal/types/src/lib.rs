//! HEAL Types - Core data model for the cluster self-healing engine
//!
//! The engine reconciles three independent views of cluster membership:
//! - Compute instances reported by the cloud scaling group ([`ComputeInstance`])
//! - Declarative control-plane registry entries ([`ControlPlaneRecord`])
//! - Heartbeat-bearing cluster membership records ([`MembershipRecord`])
//!
//! All three are correlated by the cloud [`InstanceId`], which membership
//! records carry inside a structured [`ProviderId`].

pub mod cluster;
pub mod consensus;
pub mod error;
pub mod ids;
pub mod instance;
pub mod master;
pub mod node;
pub mod pool;
pub mod role;

pub use cluster::{ClusterDescriptor, ComponentVersions, StackBinding};
pub use consensus::{ConsensusMember, EndpointStatus};
pub use error::{TypesError, TypesResult};
pub use ids::{ConsensusMemberId, InstanceId, PoolId, ProviderId, ScalingGroupId};
pub use instance::{ComputeInstance, InstanceStatus};
pub use master::{ControlPlaneRecord, MasterRole, MasterSet};
pub use node::{ConditionStatus, MembershipRecord, NodeCondition, NodeConditionKind};
pub use pool::{NodePool, PoolBind};
pub use role::{labels, tags, Role};

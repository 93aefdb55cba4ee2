//! Consensus store membership

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::ids::ConsensusMemberId;

/// Member of the distributed consensus store backing the control plane.
///
/// Correlated to compute instances by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMember {
    pub id: ConsensusMemberId,
    pub name: String,
    pub ip: IpAddr,
}

/// Health of a single consensus endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub member: ConsensusMemberId,
    pub leader: bool,
    pub healthy: bool,
    pub db_size: u64,
}

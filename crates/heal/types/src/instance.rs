//! Cloud compute instances
//!
//! Instances are re-fetched from the scaling group every cycle and never
//! cached beyond a single snapshot.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::ids::InstanceId;

/// One cloud machine as reported by its scaling group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInstance {
    /// Cloud instance id
    pub id: InstanceId,

    /// Primary private address
    pub ip: IpAddr,

    /// Lifecycle status reported by the provider
    pub status: InstanceStatus,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Provider tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ComputeInstance {
    pub fn new(id: InstanceId, ip: IpAddr) -> Self {
        Self {
            id,
            ip,
            status: InstanceStatus::Running,
            created_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    /// Set the creation time
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Time elapsed since the instance was created.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstanceStatus {
    Pending,
    Starting,
    #[default]
    Running,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_age() {
        let now = Utc::now();
        let instance = ComputeInstance::new(InstanceId::new("i-1"), "10.0.0.1".parse().unwrap())
            .created_at(now - Duration::minutes(7));
        assert_eq!(instance.age(now), Duration::minutes(7));
    }

    #[test]
    fn test_instance_tags() {
        let instance = ComputeInstance::new(InstanceId::new("i-1"), "10.0.0.1".parse().unwrap())
            .with_tag("role", "master");
        assert_eq!(instance.tag("role"), Some("master"));
        assert_eq!(instance.tag("missing"), None);
    }
}

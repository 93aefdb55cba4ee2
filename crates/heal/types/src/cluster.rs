//! Cluster descriptor
//!
//! The declarative identity of one cluster. Read at the start of every fix
//! cycle; only external provisioning flows mutate it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stack output key holding the control-plane scaling group id.
pub const OUTPUT_MASTER_SCALING_GROUP: &str = "MasterScalingGroupId";

/// Declarative specification of one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// Cluster name
    pub name: String,

    /// Cloud region
    pub region: String,

    /// API server endpoints
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Binding to the cloud stack that created the cluster
    pub stack: Option<StackBinding>,

    /// Component version pins
    pub versions: ComponentVersions,
}

impl ClusterDescriptor {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            endpoints: Vec::new(),
            stack: None,
            versions: ComponentVersions::default(),
        }
    }

    /// Bind to a cloud stack
    pub fn with_stack(mut self, stack: StackBinding) -> Self {
        self.stack = Some(stack);
        self
    }

    /// Look up a cached stack output.
    pub fn stack_output(&self, key: &str) -> Option<&str> {
        self.stack
            .as_ref()
            .and_then(|s| s.outputs.get(key))
            .map(String::as_str)
    }
}

/// Cloud stack binding with its cached outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackBinding {
    pub stack_id: String,

    /// Outputs cached from the one-time stack lookup; empty until resolved
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl StackBinding {
    pub fn new(stack_id: impl Into<String>) -> Self {
        Self {
            stack_id: stack_id.into(),
            outputs: BTreeMap::new(),
        }
    }
}

/// Kubelet and etcd version pins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersions {
    pub kubelet: semver::Version,
    pub etcd: semver::Version,
}

impl Default for ComponentVersions {
    fn default() -> Self {
        Self {
            kubelet: semver::Version::new(1, 28, 3),
            etcd: semver::Version::new(3, 5, 9),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_output_lookup() {
        let mut stack = StackBinding::new("stack-1");
        stack
            .outputs
            .insert(OUTPUT_MASTER_SCALING_GROUP.to_string(), "asg-1".to_string());
        let cluster = ClusterDescriptor::new("prod", "cn-hangzhou").with_stack(stack);

        assert_eq!(cluster.stack_output(OUTPUT_MASTER_SCALING_GROUP), Some("asg-1"));
        assert_eq!(cluster.stack_output("Other"), None);
    }
}

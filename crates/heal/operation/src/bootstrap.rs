//! Role-specific machine bootstrap
//!
//! The user data handed to a disk replacement. The rendered script exports
//! the role parameters and runs the node installer; the provider receives it
//! base64 encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use heal_types::{ClusterDescriptor, InstanceId, Role};
use serde::Serialize;

/// Installer invoked by the rendered script.
const INSTALLER: &str = "/usr/local/bin/heal-node-install";

/// Parameters for re-joining one machine to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapData {
    pub role: String,
    pub cluster: String,
    pub region: String,
    pub instance_id: InstanceId,
    pub endpoints: Vec<String>,
    pub kubelet_version: String,
    pub etcd_version: Option<String>,
    pub pool: Option<String>,
}

impl BootstrapData {
    pub fn new(cluster: &ClusterDescriptor, role: &Role, instance_id: &InstanceId) -> Self {
        let (name, etcd_version, pool) = match role {
            Role::Master => ("master", Some(cluster.versions.etcd.to_string()), None),
            Role::Worker(pool) => ("worker", None, Some(pool.as_str().to_string())),
        };
        Self {
            role: name.to_string(),
            cluster: cluster.name.clone(),
            region: cluster.region.clone(),
            instance_id: instance_id.clone(),
            endpoints: cluster.endpoints.clone(),
            kubelet_version: cluster.versions.kubelet.to_string(),
            etcd_version,
            pool,
        }
    }

    /// Render the boot script.
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\nset -euo pipefail\n");
        let mut export = |key: &str, value: &str| {
            script.push_str(&format!("export {}='{}'\n", key, value));
        };
        export("HEAL_ROLE", &self.role);
        export("HEAL_CLUSTER", &self.cluster);
        export("HEAL_REGION", &self.region);
        export("HEAL_INSTANCE_ID", self.instance_id.as_str());
        export("HEAL_ENDPOINTS", &self.endpoints.join(","));
        export("HEAL_KUBELET_VERSION", &self.kubelet_version);
        if let Some(etcd) = &self.etcd_version {
            export("HEAL_ETCD_VERSION", etcd);
        }
        if let Some(pool) = &self.pool {
            export("HEAL_NODEPOOL_ID", pool);
        }
        script.push_str(INSTALLER);
        script.push('\n');
        script
    }

    /// Base64 user data for the provider.
    pub fn encode(&self) -> String {
        STANDARD.encode(self.render())
    }
}

//! Cloud provider contract
//!
//! Every call blocks until the provider reports completion; asynchronous
//! cloud operations are polled to completion inside the implementation.

use async_trait::async_trait;
use heal_types::{ComputeInstance, InstanceId, ScalingGroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::InfraResult;

/// Options for replacing an instance's system disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceDiskOptions {
    /// Image to install, `None` keeps the current image
    pub image_id: Option<String>,

    /// Keep the login password of the old disk
    pub keep_password: bool,
}

/// Output of a remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub output: String,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Cloud compute and scaling operations
#[async_trait]
pub trait Provider: Send + Sync {
    /// Instances currently in a scaling group, keyed by id.
    async fn describe_scaling_group_instances(
        &self,
        group: &ScalingGroupId,
    ) -> InfraResult<BTreeMap<InstanceId, ComputeInstance>>;

    /// Outputs of the cloud stack that created the cluster.
    async fn stack_outputs(&self, stack_id: &str) -> InfraResult<BTreeMap<String, String>>;

    /// Reboot an instance.
    async fn restart_ecs(&self, id: &InstanceId) -> InfraResult<()>;

    /// Replace the system disk and boot with the given user data.
    async fn replace_system_disk(
        &self,
        id: &InstanceId,
        userdata: &str,
        opt: &ReplaceDiskOptions,
    ) -> InfraResult<()>;

    /// Merge tags onto an instance.
    async fn tag_ecs(&self, id: &InstanceId, tags: &BTreeMap<String, String>) -> InfraResult<()>;

    /// Run a shell command on an instance.
    async fn run_command(&self, id: &InstanceId, cmd: &str) -> InfraResult<CommandResult>;

    /// Detach and release one instance from a scaling group.
    async fn remove_scaling_group_ecs(
        &self,
        group: &ScalingGroupId,
        id: &InstanceId,
    ) -> InfraResult<()>;

    /// Set the control-plane scaling group capacity.
    async fn scale_master_group(&self, group: &ScalingGroupId, desired: usize) -> InfraResult<()>;

    /// Set a worker pool's scaling group capacity.
    async fn scale_node_pool(&self, group: &ScalingGroupId, desired: usize) -> InfraResult<()>;
}

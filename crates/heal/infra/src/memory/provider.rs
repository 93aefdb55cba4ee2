//! In-memory cloud provider

use async_trait::async_trait;
use chrono::Utc;
use heal_types::{ComputeInstance, InstanceId, ProviderId, ScalingGroupId};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{InMemoryClusterApi, Journal};
use crate::collector::InstanceMap;
use crate::error::{InfraError, InfraResult};
use crate::provider::{CommandResult, Provider, ReplaceDiskOptions};

/// How the simulated membership agent on an instance reacts to repairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentBehavior {
    /// A restart or remote command brings the heartbeat back
    pub restart_heals: bool,
    /// A system disk replacement brings the heartbeat back
    pub reset_heals: bool,
}

impl Default for AgentBehavior {
    fn default() -> Self {
        Self {
            restart_heals: true,
            reset_heals: true,
        }
    }
}

/// A recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    RestartEcs(InstanceId),
    ReplaceSystemDisk { id: InstanceId, userdata: String },
    TagEcs { id: InstanceId, tags: BTreeMap<String, String> },
    RunCommand { id: InstanceId, cmd: String },
    RemoveScalingGroupEcs { group: ScalingGroupId, id: InstanceId },
    ScaleMasterGroup { group: ScalingGroupId, desired: usize },
    ScaleNodePool { group: ScalingGroupId, desired: usize },
}

/// In-memory scaling groups and instances
pub struct InMemoryProvider {
    region: String,
    groups: RwLock<BTreeMap<ScalingGroupId, InstanceMap>>,
    stacks: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
    agents: RwLock<BTreeMap<InstanceId, AgentBehavior>>,
    command_results: RwLock<BTreeMap<InstanceId, CommandResult>>,
    calls: RwLock<Vec<ProviderCall>>,
    cluster: Option<Arc<InMemoryClusterApi>>,
    journal: Journal,
    next_instance: AtomicU32,
}

impl InMemoryProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            groups: RwLock::new(BTreeMap::new()),
            stacks: RwLock::new(BTreeMap::new()),
            agents: RwLock::new(BTreeMap::new()),
            command_results: RwLock::new(BTreeMap::new()),
            calls: RwLock::new(Vec::new()),
            cluster: None,
            journal: Journal::new(),
            next_instance: AtomicU32::new(1),
        }
    }

    /// Simulate the membership agent against the given cluster API
    pub fn with_agent(mut self, cluster: Arc<InMemoryClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Record mutating calls into a shared journal
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub async fn add_instance(&self, group: &ScalingGroupId, instance: ComputeInstance) {
        self.groups
            .write()
            .await
            .entry(group.clone())
            .or_default()
            .insert(instance.id.clone(), instance);
    }

    pub async fn set_stack_outputs(&self, stack_id: &str, outputs: BTreeMap<String, String>) {
        self.stacks.write().await.insert(stack_id.to_string(), outputs);
    }

    pub async fn set_agent(&self, id: &InstanceId, behavior: AgentBehavior) {
        self.agents.write().await.insert(id.clone(), behavior);
    }

    /// Make `run_command` return `result` for the instance instead of succeeding.
    pub async fn set_command_result(&self, id: &InstanceId, result: CommandResult) {
        self.command_results.write().await.insert(id.clone(), result);
    }

    pub async fn instances(&self, group: &ScalingGroupId) -> InstanceMap {
        self.groups
            .read()
            .await
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn find_instance(&self, id: &InstanceId) -> Option<ComputeInstance> {
        self.groups
            .read()
            .await
            .values()
            .find_map(|g| g.get(id).cloned())
    }

    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.read().await.clone()
    }

    async fn record(&self, call: ProviderCall, entry: String) {
        self.calls.write().await.push(call);
        self.journal.record(entry).await;
    }

    async fn require_instance(&self, id: &InstanceId) -> InfraResult<ComputeInstance> {
        self.find_instance(id)
            .await
            .ok_or_else(|| InfraError::not_found("instance", id.as_str()))
    }

    async fn agent(&self, id: &InstanceId) -> AgentBehavior {
        self.agents
            .read()
            .await
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    async fn heartbeat(&self, id: &InstanceId) {
        if let Some(cluster) = &self.cluster {
            cluster
                .agent_heartbeat(&ProviderId::new(self.region.clone(), id.clone()))
                .await;
        }
    }

    fn next_address(&self) -> (InstanceId, IpAddr) {
        let n = self.next_instance.fetch_add(1, Ordering::SeqCst);
        let ip = Ipv4Addr::new(10, 200, (n / 256) as u8, (n % 256) as u8);
        (InstanceId::new(format!("i-sim{:05}", n)), IpAddr::V4(ip))
    }

    async fn scale_group(&self, group: &ScalingGroupId, desired: usize) {
        let mut created = Vec::new();
        {
            let mut groups = self.groups.write().await;
            let members = groups.entry(group.clone()).or_default();
            while members.len() < desired {
                let (id, ip) = self.next_address();
                created.push(id.clone());
                members.insert(id.clone(), ComputeInstance::new(id, ip));
            }
            if members.len() > desired {
                let mut newest: Vec<_> = members
                    .values()
                    .map(|i| (i.created_at, i.id.clone()))
                    .collect();
                newest.sort();
                for (_, id) in newest.into_iter().rev().take(members.len() - desired) {
                    members.remove(&id);
                }
            }
        }
        for id in created {
            self.heartbeat(&id).await;
        }
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn describe_scaling_group_instances(
        &self,
        group: &ScalingGroupId,
    ) -> InfraResult<InstanceMap> {
        Ok(self.instances(group).await)
    }

    async fn stack_outputs(&self, stack_id: &str) -> InfraResult<BTreeMap<String, String>> {
        self.stacks
            .read()
            .await
            .get(stack_id)
            .cloned()
            .ok_or_else(|| InfraError::not_found("stack", stack_id))
    }

    async fn restart_ecs(&self, id: &InstanceId) -> InfraResult<()> {
        self.require_instance(id).await?;
        self.record(
            ProviderCall::RestartEcs(id.clone()),
            format!("provider.restart_ecs {}", id),
        )
        .await;
        if self.agent(id).await.restart_heals {
            self.heartbeat(id).await;
        }
        Ok(())
    }

    async fn replace_system_disk(
        &self,
        id: &InstanceId,
        userdata: &str,
        _opt: &ReplaceDiskOptions,
    ) -> InfraResult<()> {
        self.require_instance(id).await?;
        self.record(
            ProviderCall::ReplaceSystemDisk {
                id: id.clone(),
                userdata: userdata.to_string(),
            },
            format!("provider.replace_system_disk {}", id),
        )
        .await;
        if self.agent(id).await.reset_heals {
            self.heartbeat(id).await;
        }
        Ok(())
    }

    async fn tag_ecs(&self, id: &InstanceId, tags: &BTreeMap<String, String>) -> InfraResult<()> {
        {
            let mut groups = self.groups.write().await;
            let instance = groups
                .values_mut()
                .find_map(|g| g.get_mut(id))
                .ok_or_else(|| InfraError::not_found("instance", id.as_str()))?;
            instance
                .tags
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.record(
            ProviderCall::TagEcs {
                id: id.clone(),
                tags: tags.clone(),
            },
            format!("provider.tag_ecs {}", id),
        )
        .await;
        Ok(())
    }

    async fn run_command(&self, id: &InstanceId, cmd: &str) -> InfraResult<CommandResult> {
        self.require_instance(id).await?;
        self.record(
            ProviderCall::RunCommand {
                id: id.clone(),
                cmd: cmd.to_string(),
            },
            format!("provider.run_command {}", id),
        )
        .await;

        if let Some(result) = self.command_results.read().await.get(id) {
            return Ok(result.clone());
        }
        if self.agent(id).await.restart_heals {
            self.heartbeat(id).await;
        }
        Ok(CommandResult::success(format!("ran at {}", Utc::now().to_rfc3339())))
    }

    async fn remove_scaling_group_ecs(
        &self,
        group: &ScalingGroupId,
        id: &InstanceId,
    ) -> InfraResult<()> {
        self.groups
            .write()
            .await
            .get_mut(group)
            .and_then(|g| g.remove(id))
            .ok_or_else(|| InfraError::not_found("instance", id.as_str()))?;
        self.record(
            ProviderCall::RemoveScalingGroupEcs {
                group: group.clone(),
                id: id.clone(),
            },
            format!("provider.remove_scaling_group_ecs {}", id),
        )
        .await;
        Ok(())
    }

    async fn scale_master_group(&self, group: &ScalingGroupId, desired: usize) -> InfraResult<()> {
        self.record(
            ProviderCall::ScaleMasterGroup {
                group: group.clone(),
                desired,
            },
            format!("provider.scale_master_group {}", desired),
        )
        .await;
        self.scale_group(group, desired).await;
        Ok(())
    }

    async fn scale_node_pool(&self, group: &ScalingGroupId, desired: usize) -> InfraResult<()> {
        self.record(
            ProviderCall::ScaleNodePool {
                group: group.clone(),
                desired,
            },
            format!("provider.scale_node_pool {}", desired),
        )
        .await;
        self.scale_group(group, desired).await;
        Ok(())
    }
}

//! Repair actions bound to one correlated row

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use heal_infra::{
    CommandResult, ConsensusClient, HealContext, InfraError, NodeMutation, ReplaceDiskOptions,
};
use heal_triple::NodeInfo;
use heal_types::{
    labels, tags, ClusterDescriptor, ComputeInstance, ConsensusMember, InstanceId,
    MembershipRecord,
};
use tracing::{debug, info, instrument, warn};

use crate::admission;
use crate::bootstrap::BootstrapData;
use crate::config::OperationConfig;
use crate::error::{OperationError, OperationResult};

/// Command that restarts the membership agent in place.
pub const RESTART_AGENT: &str = "systemctl restart kubelet";

/// Hands out [`NodeOperation`]s sharing one set of collaborators
#[derive(Clone)]
pub struct OperationMgr {
    ctx: HealContext,
    config: OperationConfig,
}

impl OperationMgr {
    pub fn new(ctx: HealContext, config: OperationConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    pub fn context(&self) -> &HealContext {
        &self.ctx
    }

    /// Operation bound to one row of a snapshot of `cluster`.
    pub fn operation(&self, cluster: &ClusterDescriptor, info: &NodeInfo) -> NodeOperation {
        NodeOperation {
            ctx: self.ctx.clone(),
            config: self.config.clone(),
            cluster: cluster.clone(),
            info: info.clone(),
        }
    }

    pub async fn remove_consensus_member_by_ip(
        &self,
        ip: IpAddr,
    ) -> OperationResult<Option<ConsensusMember>> {
        remove_consensus_member_by_ip(self.ctx.consensus.as_ref(), ip).await
    }
}

/// Remove the consensus member listening on `ip`, if there is one.
pub async fn remove_consensus_member_by_ip(
    consensus: &dyn ConsensusClient,
    ip: IpAddr,
) -> OperationResult<Option<ConsensusMember>> {
    let members = consensus.member_list().await?;
    match members.into_iter().find(|m| m.ip == ip) {
        Some(member) => {
            consensus.remove_member(&member).await?;
            info!(member = %member.id, %ip, "Removed consensus member");
            Ok(Some(member))
        }
        None => {
            debug!(%ip, "No consensus member at address");
            Ok(None)
        }
    }
}

fn master_labels() -> BTreeMap<String, String> {
    [labels::MASTER, labels::CONTROL_PLANE]
        .into_iter()
        .map(|k| (k.to_string(), String::new()))
        .collect()
}

fn backs(record: &MembershipRecord, id: &InstanceId) -> bool {
    record.provider().map(|p| p.matches(id)).unwrap_or(false)
}

fn heartbeat_since(record: &MembershipRecord, since: DateTime<Utc>) -> bool {
    record.is_ready()
        && record
            .ready_condition()
            .map(|c| c.last_heartbeat >= since)
            .unwrap_or(false)
}

/// Repair executor for a single machine.
///
/// Holds a snapshot of its row; every mutation re-reads the live membership
/// record so it acts on current state.
pub struct NodeOperation {
    ctx: HealContext,
    config: OperationConfig,
    cluster: ClusterDescriptor,
    info: NodeInfo,
}

impl NodeOperation {
    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn instance(&self) -> OperationResult<&ComputeInstance> {
        self.info
            .instance
            .as_ref()
            .ok_or_else(|| OperationError::NoInstance(self.info.name()))
    }

    fn instance_id(&self) -> OperationResult<InstanceId> {
        self.info
            .instance_id()
            .ok_or_else(|| OperationError::NoInstance(self.info.name()))
    }

    /// Deny instances that are still booting.
    pub fn admit_fresh(&self, now: DateTime<Utc>) -> OperationResult<()> {
        admission::admit_fresh(self.instance()?, now, self.config.fresh_instance_age).into_result()
    }

    /// Deny records that only just turned unready.
    pub fn admit_node(&self, now: DateTime<Utc>) -> OperationResult<()> {
        admission::admit_node(
            self.info.node.as_ref(),
            now,
            self.config.node_admit_window,
            self.config.retry_after,
        )
        .into_result()
    }

    /// Deny instances repaired within the window. A first sighting stamps
    /// the instance and is denied.
    pub async fn admit_ecs(&self, now: DateTime<Utc>) -> OperationResult<()> {
        let instance = self.instance()?;
        let last_repaired = match instance.tag(tags::LAST_REPAIRED) {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    warn!(instance_id = %instance.id, raw, error = %e, "Ignoring malformed repair stamp");
                    None
                }
            },
            None => None,
        };

        let admission = admission::admit_ecs(last_repaired, now, self.config.ecs_admit_window);
        if last_repaired.is_none() {
            self.stamp(&instance.id, now).await?;
            info!(instance_id = %instance.id, "First sighting, repair deferred");
        }
        admission.into_result()
    }

    async fn stamp(&self, id: &InstanceId, at: DateTime<Utc>) -> OperationResult<()> {
        let mut stamp = BTreeMap::new();
        stamp.insert(tags::LAST_REPAIRED.to_string(), at.to_rfc3339());
        self.ctx.provider.tag_ecs(id, &stamp).await?;
        Ok(())
    }

    /// Current membership record for this machine, if any.
    ///
    /// The record named in the row is read directly; a scan by provider id
    /// covers a missing or re-registered record.
    pub async fn find_record(&self) -> OperationResult<Option<MembershipRecord>> {
        let id = self.instance_id()?;
        if let Some(node) = &self.info.node {
            match self.ctx.cluster.get_node(&node.name).await {
                Ok(record) if backs(&record, &id) => return Ok(Some(record)),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        let nodes = self.ctx.cluster.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .find(|n| backs(n, &id)))
    }

    async fn patch(&self, mutation: NodeMutation) -> OperationResult<MembershipRecord> {
        let record = match self.find_record().await? {
            Some(record) => record,
            None => return Err(OperationError::NoRecord(self.instance_id()?)),
        };
        Ok(self.ctx.cluster.patch_node(&record.name, mutation).await?)
    }

    /// Merge labels onto the membership record.
    pub async fn label_node(
        &self,
        labels: BTreeMap<String, String>,
    ) -> OperationResult<MembershipRecord> {
        self.patch(Box::new(move |n: &mut MembershipRecord| {
            n.labels.extend(labels)
        })).await
    }

    /// Apply the control-plane role labels.
    pub async fn label_master(&self) -> OperationResult<MembershipRecord> {
        self.label_node(master_labels()).await
    }

    pub async fn cordon(&self) -> OperationResult<MembershipRecord> {
        self.patch(Box::new(|n: &mut MembershipRecord| n.unschedulable = true)).await
    }

    pub async fn uncordon(&self) -> OperationResult<MembershipRecord> {
        self.patch(Box::new(|n: &mut MembershipRecord| n.unschedulable = false)).await
    }

    /// Cordon, then evict every workload. Returns the eviction count.
    pub async fn drain(&self) -> OperationResult<usize> {
        let record = self.cordon().await?;
        let evicted = self.ctx.cluster.evict_pods(&record.name).await?;
        info!(node = %record.name, evicted, "Drained node");
        Ok(evicted)
    }

    /// Run a command on the machine, failing on a nonzero exit.
    pub async fn run_command(&self, cmd: &str) -> OperationResult<CommandResult> {
        let id = self.instance()?.id.clone();
        let result = self.ctx.provider.run_command(&id, cmd).await?;
        if !result.is_success() {
            return Err(InfraError::CommandFailed {
                instance_id: id,
                exit_code: result.exit_code,
                output: result.output,
            }
            .into());
        }
        Ok(result)
    }

    /// Restart the membership agent and wait for a fresh heartbeat. When
    /// the command cannot run on the machine it is rebooted instead.
    #[instrument(skip(self), fields(row = %self.info.name()))]
    pub async fn restart(&self) -> OperationResult<MembershipRecord> {
        let started = Utc::now();
        if let Err(e) = self.run_command(RESTART_AGENT).await {
            let id = self.instance()?.id.clone();
            warn!(instance_id = %id, error = %e, "Agent restart failed, rebooting machine");
            self.ctx.provider.restart_ecs(&id).await?;
        }
        let record = self
            .wait_heartbeat(self.config.restart_verify_timeout, started)
            .await?;
        info!(node = %record.name, "Agent restart recovered heartbeat");
        Ok(record)
    }

    /// Poll until the machine's record is ready with a heartbeat no older
    /// than `since`.
    pub async fn wait_heartbeat(
        &self,
        timeout: Duration,
        since: DateTime<Utc>,
    ) -> OperationResult<MembershipRecord> {
        let id = self.instance_id()?;
        let poll = self.config.heartbeat_poll_interval;

        let wait = async {
            loop {
                match self.find_record().await {
                    Ok(Some(record)) if heartbeat_since(&record, since) => return record,
                    Ok(_) => {}
                    Err(e) => debug!(instance_id = %id, error = %e, "Heartbeat poll failed"),
                }
                tokio::time::sleep(poll).await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| OperationError::HeartbeatTimeout {
                instance_id: id.clone(),
                timeout,
            })
    }

    /// Reinstall the machine from scratch.
    ///
    /// Drains the record (best effort) and retires the consensus member of
    /// a control-plane machine before its disk is replaced. Once the agent
    /// reports back the record is uncordoned.
    #[instrument(skip(self), fields(row = %self.info.name()))]
    pub async fn reset(&self) -> OperationResult<MembershipRecord> {
        let instance = self.instance()?.clone();

        if self.info.node.is_some() {
            if let Err(e) = self.drain().await {
                warn!(instance_id = %instance.id, error = %e, "Drain before reset failed, continuing");
            }
        }

        if self.info.role.is_master() {
            remove_consensus_member_by_ip(self.ctx.consensus.as_ref(), instance.ip).await?;
        }

        let userdata = BootstrapData::new(&self.cluster, &self.info.role, &instance.id).encode();
        let started = Utc::now();
        self.ctx
            .provider
            .replace_system_disk(&instance.id, &userdata, &ReplaceDiskOptions::default())
            .await?;
        self.stamp(&instance.id, Utc::now()).await?;

        let record = match self
            .wait_heartbeat(self.config.heartbeat_timeout, started)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(instance_id = %instance.id, error = %e, "Machine did not return after reset");
                return Err(OperationError::RepairFailed {
                    instance_id: instance.id,
                });
            }
        };

        info!(instance_id = %instance.id, node = %record.name, "Reset complete");
        let record = match self.uncordon().await {
            Ok(record) => record,
            Err(e) => {
                warn!(node = %record.name, error = %e, "Uncordon after reset failed");
                record
            }
        };
        if self.info.role.is_master() {
            return self.label_master().await;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use heal_infra::ClusterApi;
    use heal_infra::memory::{
        AgentBehavior, InMemoryClusterApi, InMemoryConsensus, InMemoryProvider, Journal,
        ProviderCall,
    };
    use heal_types::{
        ConditionStatus, ConsensusMemberId, PoolId, ProviderId, Role, ScalingGroupId,
    };
    use std::sync::Arc;

    const REGION: &str = "cn-hangzhou";

    struct Fixture {
        cluster: Arc<InMemoryClusterApi>,
        provider: Arc<InMemoryProvider>,
        consensus: Arc<InMemoryConsensus>,
        journal: Journal,
        mgr: OperationMgr,
    }

    fn instance() -> ComputeInstance {
        ComputeInstance::new(InstanceId::new("i-1"), "10.0.0.1".parse().unwrap())
            .created_at(Utc::now() - ChronoDuration::hours(1))
    }

    fn unready_node() -> MembershipRecord {
        MembershipRecord::new("node1", &ProviderId::new(REGION, InstanceId::new("i-1")))
            .with_ready(ConditionStatus::False, Utc::now() - ChronoDuration::minutes(10))
    }

    async fn fixture() -> Fixture {
        let journal = Journal::new();
        let cluster = Arc::new(
            InMemoryClusterApi::new(ClusterDescriptor::new("prod", REGION))
                .with_journal(journal.clone()),
        );
        let provider = Arc::new(
            InMemoryProvider::new(REGION)
                .with_agent(cluster.clone())
                .with_journal(journal.clone()),
        );
        let consensus = Arc::new(InMemoryConsensus::new().with_journal(journal.clone()));

        provider
            .add_instance(&ScalingGroupId::new("asg-m"), instance())
            .await;
        cluster.insert_node(unready_node()).await;

        let ctx = HealContext::new(cluster.clone(), provider.clone(), consensus.clone());
        Fixture {
            cluster,
            provider,
            consensus,
            journal,
            mgr: OperationMgr::new(ctx, OperationConfig::default()),
        }
    }

    fn row(role: Role, instance: ComputeInstance) -> NodeInfo {
        NodeInfo {
            role,
            instance: Some(instance),
            node: Some(unready_node()),
            resource: None,
        }
    }

    fn op(f: &Fixture, info: NodeInfo) -> NodeOperation {
        f.mgr
            .operation(&ClusterDescriptor::new("prod", REGION), &info)
    }

    #[tokio::test]
    async fn test_restart_recovers_heartbeat() {
        let f = fixture().await;
        let op = op(&f, row(Role::Master, instance()));

        let record = op.restart().await.unwrap();
        assert!(record.is_ready());
        assert!(f.provider.calls().await.contains(&ProviderCall::RunCommand {
            id: InstanceId::new("i-1"),
            cmd: RESTART_AGENT.to_string(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_times_out_without_heartbeat() {
        let f = fixture().await;
        f.provider
            .set_agent(
                &InstanceId::new("i-1"),
                AgentBehavior {
                    restart_heals: false,
                    reset_heals: true,
                },
            )
            .await;
        let op = op(&f, row(Role::Master, instance()));

        let err = op.restart().await.unwrap_err();
        assert!(matches!(err, OperationError::HeartbeatTimeout { .. }));
    }

    #[tokio::test]
    async fn test_failed_agent_restart_reboots_machine() {
        let f = fixture().await;
        f.provider
            .set_command_result(
                &InstanceId::new("i-1"),
                CommandResult {
                    exit_code: 1,
                    output: "agent unreachable".to_string(),
                },
            )
            .await;
        let op = op(&f, row(Role::Master, instance()));

        let record = op.restart().await.unwrap();
        assert!(record.is_ready());
        let command = f.journal.position("provider.run_command i-1").await.unwrap();
        let reboot = f.journal.position("provider.restart_ecs i-1").await.unwrap();
        assert!(command < reboot);
    }

    #[tokio::test]
    async fn test_find_record_follows_reregistered_machine() {
        let f = fixture().await;
        let op = op(&f, row(Role::Master, instance()));
        assert_eq!(op.find_record().await.unwrap().unwrap().name, "node1");

        // the row's record name now belongs to another machine
        f.cluster.delete_node("node1").await.unwrap();
        f.cluster
            .insert_node(MembershipRecord::new(
                "node1",
                &ProviderId::new(REGION, InstanceId::new("i-9")),
            ))
            .await;
        assert!(op.find_record().await.unwrap().is_none());

        f.cluster
            .insert_node(MembershipRecord::new(
                "i-1",
                &ProviderId::new(REGION, InstanceId::new("i-1")),
            ))
            .await;
        assert_eq!(op.find_record().await.unwrap().unwrap().name, "i-1");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let f = fixture().await;
        f.provider
            .set_command_result(
                &InstanceId::new("i-1"),
                CommandResult {
                    exit_code: 5,
                    output: "unit not found".to_string(),
                },
            )
            .await;
        let op = op(&f, row(Role::Master, instance()));

        let err = op.run_command("true").await.unwrap_err();
        assert!(matches!(
            err,
            OperationError::Infra(InfraError::CommandFailed { exit_code: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_first_sighting_stamps_and_defers() {
        let f = fixture().await;
        let now = Utc::now();
        let op = op(&f, row(Role::Master, instance()));

        let err = op.admit_ecs(now).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(180)));

        let stamped = f.provider.find_instance(&InstanceId::new("i-1")).await.unwrap();
        assert_eq!(stamped.tag(tags::LAST_REPAIRED), Some(now.to_rfc3339().as_str()));
    }

    #[tokio::test]
    async fn test_old_stamp_is_admitted() {
        let f = fixture().await;
        let now = Utc::now();
        let stamped = instance().with_tag(
            tags::LAST_REPAIRED,
            (now - ChronoDuration::minutes(4)).to_rfc3339(),
        );
        let op = op(&f, row(Role::Master, stamped));

        op.admit_ecs(now).await.unwrap();
        assert!(f.provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_instance_gate() {
        let f = fixture().await;
        let now = Utc::now();
        let young = instance().created_at(now - ChronoDuration::minutes(1));
        let op = op(&f, row(Role::Master, young));

        let err = op.admit_fresh(now).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(240)));
        op.admit_node(now).unwrap();
    }

    #[tokio::test]
    async fn test_master_reset_retires_member_before_disk() {
        let f = fixture().await;
        f.consensus
            .add_member(ConsensusMember {
                id: ConsensusMemberId::new(1),
                name: "etcd-1".to_string(),
                ip: "10.0.0.1".parse().unwrap(),
            })
            .await;
        f.cluster.set_workloads("node1", 3).await;
        let op = op(&f, row(Role::Master, instance()));

        let record = op.reset().await.unwrap();
        assert!(record.is_ready());
        assert!(record.labels.contains_key(labels::CONTROL_PLANE));
        assert!(!record.unschedulable);
        assert!(f.consensus.members().await.is_empty());

        let removed = f.journal.position("consensus.remove_member").await.unwrap();
        let replaced = f
            .journal
            .position("provider.replace_system_disk")
            .await
            .unwrap();
        assert!(removed < replaced);
        assert!(f.journal.position("cluster.evict_pods").await.unwrap() < removed);

        let userdata = f.provider.calls().await.into_iter().find_map(|c| match c {
            ProviderCall::ReplaceSystemDisk { userdata, .. } => Some(userdata),
            _ => None,
        });
        assert!(userdata.is_some());
    }

    #[tokio::test]
    async fn test_worker_reset_keeps_consensus() {
        let f = fixture().await;
        f.consensus
            .add_member(ConsensusMember {
                id: ConsensusMemberId::new(1),
                name: "etcd-1".to_string(),
                ip: "10.0.0.1".parse().unwrap(),
            })
            .await;
        let op = op(&f, row(Role::Worker(PoolId::new("np-1")), instance()));

        let record = op.reset().await.unwrap();
        assert!(!record.labels.contains_key(labels::MASTER));
        assert_eq!(f.consensus.members().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_without_heartbeat_fails_repair() {
        let f = fixture().await;
        f.provider
            .set_agent(
                &InstanceId::new("i-1"),
                AgentBehavior {
                    restart_heals: false,
                    reset_heals: false,
                },
            )
            .await;
        let op = op(&f, row(Role::Master, instance()));

        let err = op.reset().await.unwrap_err();
        assert!(matches!(err, OperationError::RepairFailed { .. }));
        let stamped = f.provider.find_instance(&InstanceId::new("i-1")).await.unwrap();
        assert!(stamped.tag(tags::LAST_REPAIRED).is_some());
    }

    #[tokio::test]
    async fn test_cordon_and_uncordon() {
        let f = fixture().await;
        let op = op(&f, row(Role::Master, instance()));

        assert!(op.cordon().await.unwrap().unschedulable);
        assert!(!op.uncordon().await.unwrap().unschedulable);
    }

    #[tokio::test]
    async fn test_label_without_record_fails() {
        let f = fixture().await;
        f.cluster.delete_node("node1").await.unwrap();
        let op = op(&f, row(Role::Master, instance()));

        let err = op.label_master().await.unwrap_err();
        assert!(matches!(err, OperationError::NoRecord(_)));
    }

    #[tokio::test]
    async fn test_remove_unknown_member_is_noop() {
        let f = fixture().await;
        let removed = f
            .mgr
            .remove_consensus_member_by_ip("10.9.9.9".parse().unwrap())
            .await
            .unwrap();
        assert!(removed.is_none());
    }
}

//! Fix cycles
//!
//! One control-plane cycle runs three phases in a fixed order:
//! 1. metadata: drop registry entries without an instance, recreate missing ones
//! 2. consensus: retire members whose address matches no instance
//! 3. machines: drop stale membership records, then repair one machine
//!
//! Only one machine is repaired per cycle.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use heal_infra::{HealContext, InfraError};
use heal_operation::{OperationError, OperationMgr, OperationResult};
use heal_triple::{NodeInfo, Triple};
use heal_types::{
    labels, ClusterDescriptor, ControlPlaneRecord, MembershipRecord, NodePool, PoolId, Role,
};
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::HealetConfig;
use crate::error::HealetResult;
use crate::events::{FixOutcome, HealEvent, HealEventEnvelope, RepairAction};
use crate::queue::HealTask;

/// Reconciliation orchestrator for one cluster
pub struct Healet {
    pub(crate) ctx: HealContext,
    pub(crate) ops: OperationMgr,
    pub(crate) config: HealetConfig,
    /// Serializes fix cycles and scale steps.
    pub(crate) cycle: Mutex<()>,
    /// Tasks waiting out a requeue delay.
    pub(crate) pending: Arc<Mutex<HashSet<HealTask>>>,
    event_tx: broadcast::Sender<HealEventEnvelope>,
}

impl Healet {
    pub fn new(ctx: HealContext, config: HealetConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let ops = OperationMgr::new(ctx.clone(), config.operation.clone());
        Self {
            ctx,
            ops,
            config,
            cycle: Mutex::new(()),
            pending: Arc::new(Mutex::new(HashSet::new())),
            event_tx,
        }
    }

    pub fn config(&self) -> &HealetConfig {
        &self.config
    }

    /// Subscribe to heal events.
    pub fn subscribe(&self) -> broadcast::Receiver<HealEventEnvelope> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: HealEvent) {
        let _ = self.event_tx.send(HealEventEnvelope::new(event));
    }

    /// Run one control-plane fix cycle.
    #[instrument(skip(self))]
    pub async fn fix_master_node(&self) -> HealetResult<FixOutcome> {
        let _guard = self.cycle.lock().await;
        self.emit(HealEvent::CycleStarted { role: Role::Master });

        let result = self.master_cycle().await;
        self.finish(Role::Master, &result);
        result
    }

    async fn master_cycle(&self) -> HealetResult<FixOutcome> {
        let collector = self.ctx.collector();

        let triple = Triple::master(&collector).await?;
        let mut changed = self.fix_up_meta(&triple).await?;

        let triple = Triple::master(&collector).await?;
        changed |= self.fix_up_etcd(&triple).await?;

        let outcome = self.fix_up_node(&triple).await?;
        Ok(match outcome {
            FixOutcome::Converged if changed => FixOutcome::Repaired,
            other => other,
        })
    }

    /// Run one fix cycle for a worker pool.
    #[instrument(skip(self), fields(pool = %pool_id))]
    pub async fn fix_node_pool(&self, pool_id: &PoolId) -> HealetResult<FixOutcome> {
        let _guard = self.cycle.lock().await;
        let role = Role::Worker(pool_id.clone());
        self.emit(HealEvent::CycleStarted { role: role.clone() });

        let result = self.pool_cycle(pool_id).await;
        self.finish(role, &result);
        result
    }

    async fn pool_cycle(&self, pool_id: &PoolId) -> HealetResult<FixOutcome> {
        let pool = self.ctx.cluster.get_node_pool(pool_id).await?;
        if !pool.is_provisioned() {
            debug!(pool = %pool.id, "Node pool not provisioned, skipping");
            return Ok(FixOutcome::Converged);
        }

        let labeled = self.label_pool_nodes(&pool).await?;

        let triple = Triple::worker(&self.ctx.collector(), &pool).await?;
        let outcome = self.fix_up_node(&triple).await?;
        Ok(match outcome {
            FixOutcome::Converged if labeled > 0 => FixOutcome::Repaired,
            other => other,
        })
    }

    fn finish(&self, role: Role, result: &HealetResult<FixOutcome>) {
        match result {
            Ok(outcome) => {
                debug!(%role, ?outcome, "Fix cycle finished");
                self.emit(HealEvent::CycleFinished {
                    role,
                    outcome: *outcome,
                });
            }
            Err(e) => {
                warn!(%role, error = %e, "Fix cycle aborted");
                self.emit(HealEvent::CycleFailed {
                    role,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Phase 1: reconcile control-plane registry entries with instances.
    ///
    /// A missing entry is only recreated for rows with a live instance; the
    /// remaining rows are stale records removed in phase 3.
    pub async fn fix_up_meta(&self, triple: &Triple) -> HealetResult<bool> {
        let (to_delete, missing) = triple.master_crd_diff();
        let mut changed = false;

        for row in to_delete {
            let Some(resource) = &row.resource else {
                continue;
            };
            match self.ctx.cluster.delete_master(&resource.name).await {
                Ok(()) => {
                    info!(name = %resource.name, "Deleted stale control-plane record");
                    self.emit(HealEvent::RecordDeleted {
                        name: resource.name.clone(),
                    });
                    changed = true;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        for row in missing {
            let Some(instance) = &row.instance else {
                debug!(row = %row.name(), "No instance behind record, leaving to node phase");
                continue;
            };
            let record = ControlPlaneRecord::new(instance.id.clone(), instance.ip);
            let name = record.name.clone();
            match self.ctx.cluster.create_master(record).await {
                Ok(()) => {
                    info!(%name, "Recreated control-plane record");
                    self.emit(HealEvent::RecordCreated { name });
                    changed = true;
                }
                Err(InfraError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(changed)
    }

    /// Phase 2: retire consensus members with no backing instance.
    pub async fn fix_up_etcd(&self, triple: &Triple) -> HealetResult<bool> {
        let members = self.ctx.consensus.member_list().await?;
        let deletions = triple.etcd_mem_diff(&members);

        for member in &deletions {
            self.ctx.consensus.remove_member(member).await?;
            info!(member = %member.id, ip = %member.ip, "Removed stale consensus member");
            self.emit(HealEvent::MemberRemoved { ip: member.ip });
        }
        Ok(!deletions.is_empty())
    }

    /// Phase 3: drop stale membership records and repair one machine.
    ///
    /// A machine without a record takes priority; otherwise one unready
    /// machine is picked at random.
    pub async fn fix_up_node(&self, triple: &Triple) -> HealetResult<FixOutcome> {
        let (addition, deletion) = triple.instance_node_diff();
        let mut changed = false;

        for row in deletion {
            let Some(node) = &row.node else {
                continue;
            };
            match self.ctx.cluster.delete_node(&node.name).await {
                Ok(()) => {
                    info!(node = %node.name, "Deleted stale membership record");
                    self.emit(HealEvent::NodeDeleted {
                        name: node.name.clone(),
                    });
                    changed = true;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let unready = triple.unready_node_list();
        let target = match addition.first() {
            Some(row) => Some(*row),
            None => unready.choose(&mut rand::thread_rng()).copied(),
        };

        let Some(row) = target else {
            return Ok(if changed {
                FixOutcome::Repaired
            } else {
                FixOutcome::Converged
            });
        };

        match self.fix_up_hard(triple.cluster(), row).await {
            Ok(action) => {
                if let Some(instance_id) = row.instance_id() {
                    self.emit(HealEvent::NodeRepaired {
                        instance_id,
                        action,
                    });
                }
                Ok(FixOutcome::Repaired)
            }
            Err(OperationError::Retry { after }) => {
                info!(row = %row.name(), ?after, "Repair not admitted yet");
                Ok(FixOutcome::RequeueAfter(after))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Repair ladder for one machine: restart the agent in place, escalate
    /// to a full reset if the heartbeat does not return.
    #[instrument(skip(self, cluster, row), fields(row = %row.name()))]
    pub async fn fix_up_hard(
        &self,
        cluster: &ClusterDescriptor,
        row: &NodeInfo,
    ) -> OperationResult<RepairAction> {
        let op = self.ops.operation(cluster, row);
        let now = Utc::now();

        op.admit_fresh(now)?;
        op.admit_node(now)?;

        match op.restart().await {
            Ok(_) => {
                if row.role.is_master() {
                    if let Err(e) = op.label_master().await {
                        warn!(error = %e, "Labeling control-plane node failed");
                    }
                }
                info!("Restart recovered machine");
                return Ok(RepairAction::Restart);
            }
            Err(e) => warn!(error = %e, "Restart did not recover machine, escalating"),
        }

        op.admit_ecs(now).await?;
        op.reset().await?;
        info!("Reset recovered machine");
        Ok(RepairAction::Reset)
    }

    /// Label records backed by the pool's instances with the pool id.
    pub async fn label_pool_nodes(&self, pool: &NodePool) -> HealetResult<usize> {
        let instances = self.ctx.infra.node_pool_ecs(pool).await?;
        let nodes = self.ctx.cluster.list_nodes().await?;
        let mut labeled = 0;

        for node in nodes {
            if node.labels.get(labels::NODE_POOL).map(String::as_str) == Some(pool.id.as_str()) {
                continue;
            }
            let backed = node
                .provider()
                .map(|p| instances.contains_key(p.instance()))
                .unwrap_or(false);
            if !backed {
                continue;
            }

            let value = pool.id.as_str().to_string();
            self.ctx
                .cluster
                .patch_node(
                    &node.name,
                    Box::new(move |n: &mut MembershipRecord| {
                        n.labels.insert(labels::NODE_POOL.to_string(), value);
                    }),
                )
                .await?;
            info!(node = %node.name, pool = %pool.id, "Labeled pool node");
            self.emit(HealEvent::NodeLabeled {
                name: node.name,
                pool: pool.id.clone(),
            });
            labeled += 1;
        }
        Ok(labeled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, fleet, healet, id, ip, machine, member, node, REGION};
    use chrono::Duration as ChronoDuration;
    use heal_infra::memory::AgentBehavior;
    use heal_infra::{ClusterApi, Infra};
    use heal_types::{ConditionStatus, PoolBind, ProviderId, ScalingGroupId};

    #[tokio::test]
    async fn test_healthy_fleet_converges() {
        let f = fleet(&[1, 2, 3]).await;
        let healet = healet(&f);
        let mut events = healet.subscribe();

        assert_eq!(healet.fix_master_node().await.unwrap(), FixOutcome::Converged);
        assert!(f.journal.entries().await.is_empty());

        let started = events.recv().await.unwrap();
        assert!(matches!(started.event, HealEvent::CycleStarted { .. }));
        let finished = events.recv().await.unwrap();
        assert_eq!(
            finished.event,
            HealEvent::CycleFinished {
                role: Role::Master,
                outcome: FixOutcome::Converged
            }
        );
    }

    #[tokio::test]
    async fn test_meta_phase_deletes_orphan_and_recreates_missing() {
        let f = fleet(&[1, 2]).await;
        f.cluster
            .insert_master(ControlPlaneRecord::new(id(9), ip(9)))
            .await;
        f.cluster.delete_master("i-2").await.unwrap();
        let healet = healet(&f);

        let triple = Triple::master(&f.ctx.collector()).await.unwrap();
        assert!(healet.fix_up_meta(&triple).await.unwrap());

        let mut names: Vec<_> = f.cluster.masters().await.into_iter().map(|m| m.name).collect();
        names.sort();
        assert_eq!(names, vec!["i-1", "i-2"]);
    }

    #[tokio::test]
    async fn test_meta_phase_skips_rows_without_instance() {
        let f = fleet(&[1]).await;
        f.cluster.insert_node(node(7)).await;
        let healet = healet(&f);

        let triple = Triple::master(&f.ctx.collector()).await.unwrap();
        assert!(!healet.fix_up_meta(&triple).await.unwrap());
        assert_eq!(f.cluster.masters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_etcd_phase_removes_stale_member() {
        let f = fleet(&[1, 2, 3]).await;
        f.consensus.add_member(member(4)).await;
        let healet = healet(&f);

        let triple = Triple::master(&f.ctx.collector()).await.unwrap();
        assert!(healet.fix_up_etcd(&triple).await.unwrap());
        assert_eq!(f.consensus.removed().await, vec![member(4)]);
    }

    #[tokio::test]
    async fn test_node_phase_deletes_stale_record() {
        let f = fleet(&[1, 2]).await;
        f.cluster.insert_node(node(5)).await;
        let healet = healet(&f);

        assert_eq!(healet.fix_master_node().await.unwrap(), FixOutcome::Repaired);
        assert!(f.cluster.node("node5").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_record_is_repaired_by_restart() {
        let f = fleet(&[1, 2]).await;
        f.provider.add_instance(&testing::group(), machine(3)).await;
        f.cluster
            .insert_master(ControlPlaneRecord::new(id(3), ip(3)))
            .await;
        let healet = healet(&f);
        let mut events = healet.subscribe();

        assert_eq!(healet.fix_master_node().await.unwrap(), FixOutcome::Repaired);

        // the agent registered under the instance id and got the role labels
        let joined = f.cluster.node("i-3").await.unwrap();
        assert!(joined.is_ready());
        assert!(joined.labels.contains_key(labels::CONTROL_PLANE));

        let mut repaired = None;
        while let Ok(envelope) = events.try_recv() {
            if let HealEvent::NodeRepaired { instance_id, action } = envelope.event {
                repaired = Some((instance_id, action));
            }
        }
        assert_eq!(repaired, Some((id(3), RepairAction::Restart)));
    }

    #[tokio::test]
    async fn test_fresh_instance_is_requeued() {
        let f = fleet(&[1]).await;
        let fresh = heal_types::ComputeInstance::new(id(2), ip(2));
        f.provider.add_instance(&testing::group(), fresh).await;
        f.cluster
            .insert_master(ControlPlaneRecord::new(id(2), ip(2)))
            .await;
        let healet = healet(&f);

        let outcome = healet.fix_master_node().await.unwrap();
        assert!(matches!(outcome, FixOutcome::RequeueAfter(_)));
        assert!(f.provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_recently_unready_node_is_requeued() {
        let f = fleet(&[1, 2, 3]).await;
        f.cluster
            .heartbeat("node2", ConditionStatus::False)
            .await
            .unwrap();
        let healet = healet(&f);

        let outcome = healet.fix_master_node().await.unwrap();
        assert!(matches!(outcome, FixOutcome::RequeueAfter(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ladder_escalates_to_reset() {
        let f = fleet(&[1, 2, 3]).await;
        let stale = node(2).with_ready(ConditionStatus::False, Utc::now() - ChronoDuration::minutes(5));
        f.cluster.insert_node(stale).await;
        f.provider
            .set_agent(
                &id(2),
                AgentBehavior {
                    restart_heals: false,
                    reset_heals: true,
                },
            )
            .await;
        let stamped = machine(2).with_tag(
            heal_types::tags::LAST_REPAIRED,
            (Utc::now() - ChronoDuration::minutes(10)).to_rfc3339(),
        );
        f.provider.add_instance(&testing::group(), stamped).await;
        let healet = healet(&f);

        assert_eq!(healet.fix_master_node().await.unwrap(), FixOutcome::Repaired);
        assert!(f.cluster.node("node2").await.unwrap().is_ready());
        assert!(f
            .consensus
            .removed()
            .await
            .iter()
            .any(|m| m.ip == ip(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reset_sighting_is_deferred() {
        let f = fleet(&[1, 2, 3]).await;
        let stale = node(2).with_ready(ConditionStatus::False, Utc::now() - ChronoDuration::minutes(5));
        f.cluster.insert_node(stale).await;
        f.provider
            .set_agent(
                &id(2),
                AgentBehavior {
                    restart_heals: false,
                    reset_heals: true,
                },
            )
            .await;
        let healet = healet(&f);

        let outcome = healet.fix_master_node().await.unwrap();
        assert_eq!(
            outcome,
            FixOutcome::RequeueAfter(healet.config().operation.ecs_admit_window)
        );
        assert!(f.consensus.removed().await.is_empty());
    }

    #[tokio::test]
    async fn test_pool_cycle_labels_and_repairs() {
        let f = fleet(&[1]).await;
        let pool_group = ScalingGroupId::new("asg-np");
        let pool = NodePool::new(heal_types::PoolId::new("np-1"), "default", 1).with_bind(PoolBind {
            scaling_group_id: pool_group.clone(),
            scaling_config_id: "scfg-1".to_string(),
        });
        f.cluster.insert_pool(pool.clone()).await;
        f.provider.add_instance(&pool_group, machine(20)).await;
        f.cluster
            .insert_node(MembershipRecord::new(
                "worker20",
                &ProviderId::new(REGION, id(20)),
            ))
            .await;
        let healet = healet(&f);

        assert_eq!(
            healet.fix_node_pool(&pool.id).await.unwrap(),
            FixOutcome::Repaired
        );
        let worker = f.cluster.node("worker20").await.unwrap();
        assert_eq!(
            worker.labels.get(labels::NODE_POOL).map(String::as_str),
            Some("np-1")
        );

        assert_eq!(
            healet.fix_node_pool(&pool.id).await.unwrap(),
            FixOutcome::Converged
        );
        assert_eq!(f.ctx.infra.node_pool_ecs(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unprovisioned_pool_is_skipped() {
        let f = fleet(&[1]).await;
        let pool = NodePool::new(heal_types::PoolId::new("np-2"), "pending", 2);
        f.cluster.insert_pool(pool.clone()).await;
        let healet = healet(&f);

        assert_eq!(
            healet.fix_node_pool(&pool.id).await.unwrap(),
            FixOutcome::Converged
        );
    }

    #[tokio::test]
    async fn test_collect_failure_aborts_cycle() {
        let f = fleet(&[1]).await;
        let healet = healet(&f);
        let mut events = healet.subscribe();

        assert!(healet
            .fix_node_pool(&heal_types::PoolId::new("missing"))
            .await
            .is_err());
        let _started = events.recv().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap().event,
            HealEvent::CycleFailed { .. }
        ));
    }
}

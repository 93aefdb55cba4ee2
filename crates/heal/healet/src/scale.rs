//! Quorum-safe control-plane scaling
//!
//! Scale-in never jumps to the target: each call removes at most about half
//! of the consensus group and returns [`ScaleError::NextBatch`] so the caller
//! re-evaluates from fresh state. Every step retires the consensus
//! membership of the followers it drops before any of their machines is
//! released, so a live member never loses its host.

use std::cmp::Ordering;

use heal_infra::InfraError;
use heal_triple::Triple;
use heal_types::PoolId;
use tracing::{info, instrument, warn};

use crate::error::{HealetError, HealetResult, ScaleError};
use crate::events::{FixOutcome, HealEvent};
use crate::healet::Healet;

/// Replica count after one scale-in step from `current` towards `desired`.
pub fn scale_in_target(current: usize, desired: usize) -> usize {
    let step = (current.saturating_sub(1) / 2).max(1);
    current.saturating_sub(step).max(desired)
}

impl Healet {
    /// Whether the control plane may be scaled: every view agrees and every
    /// consensus endpoint is healthy.
    pub async fn healthy(&self) -> HealetResult<bool> {
        let triple = Triple::master(&self.ctx.collector()).await?;
        if !triple.system_in_consistency() {
            return Ok(false);
        }
        let endpoints = self.ctx.consensus.endpoints().await?;
        Ok(endpoints.iter().all(|e| e.healthy))
    }

    /// Move the control plane one step towards `desired` replicas.
    #[instrument(skip(self))]
    pub async fn scale_master(&self, desired: usize) -> HealetResult<FixOutcome> {
        let _guard = self.cycle.lock().await;
        if !self.healthy().await? {
            warn!(desired, "Control plane unhealthy, deferring scale");
            return Err(ScaleError::Unhealthy.into());
        }
        let current = self.ctx.infra.control_plane_ecs().await?.len();
        self.quorum_scale(current, desired).await
    }

    /// One quorum-safe step from `current` towards `desired`.
    pub async fn quorum_scale(&self, current: usize, desired: usize) -> HealetResult<FixOutcome> {
        match desired.cmp(&current) {
            Ordering::Equal => Ok(FixOutcome::Converged),
            Ordering::Greater => {
                self.scale_out(current, desired).await?;
                Ok(FixOutcome::Repaired)
            }
            Ordering::Less => {
                self.scale_in_step(current, desired).await?;
                Ok(FixOutcome::Repaired)
            }
        }
    }

    /// Grow the control-plane group; adding capacity cannot break quorum.
    pub async fn scale_out(&self, current: usize, desired: usize) -> HealetResult<()> {
        let group = self.ctx.infra.control_plane_group().await?;
        self.ctx.provider.scale_master_group(&group, desired).await?;
        info!(from = current, to = desired, "Scaled out control plane");
        self.emit(HealEvent::ScaleStep {
            from: current,
            to: desired,
            desired,
        });
        Ok(())
    }

    /// Shrink by one bounded step. Returns [`ScaleError::NextBatch`] while
    /// the target is not reached.
    pub async fn scale_in_step(&self, current: usize, desired: usize) -> HealetResult<()> {
        let target = scale_in_target(current, desired);

        self.retire_followers(current - target).await?;

        info!(from = current, to = target, desired, "Scaled in control plane");
        self.emit(HealEvent::ScaleStep {
            from: current,
            to: target,
            desired,
        });

        if target > desired {
            return Err(ScaleError::NextBatch {
                reached: target,
                desired,
            }
            .into());
        }
        Ok(())
    }

    /// Retire `count` consensus followers, then release their machines.
    ///
    /// The newest followers go first and the leader is never picked. Every
    /// machine is resolved before the first member is removed, and no
    /// machine is released until all of the members are gone.
    async fn retire_followers(&self, count: usize) -> HealetResult<()> {
        let endpoints = self.ctx.consensus.endpoints().await?;
        let members = self.ctx.consensus.member_list().await?;
        let followers: Vec<_> = members
            .into_iter()
            .rev()
            .filter(|m| endpoints.iter().any(|e| e.member == m.id && !e.leader))
            .take(count)
            .collect();
        if followers.len() < count {
            return Err(HealetError::NoFollower);
        }

        let instances = self.ctx.infra.control_plane_ecs().await?;
        let mut retiring = Vec::with_capacity(followers.len());
        for follower in followers {
            let instance_id = instances
                .values()
                .find(|i| i.ip == follower.ip)
                .map(|i| i.id.clone())
                .ok_or(HealetError::NoInstanceForMember(follower.ip))?;
            retiring.push((follower, instance_id));
        }

        for (follower, _) in &retiring {
            self.ctx.consensus.remove_member(follower).await?;
            info!(member = %follower.id, ip = %follower.ip, "Retired consensus follower");
            self.emit(HealEvent::MemberRemoved { ip: follower.ip });
        }

        let group = self.ctx.infra.control_plane_group().await?;
        for (follower, instance_id) in retiring {
            self.ctx
                .provider
                .remove_scaling_group_ecs(&group, &instance_id)
                .await?;
            info!(%instance_id, ip = %follower.ip, "Released retired follower");
        }
        Ok(())
    }

    /// Set a worker pool's capacity. Worker pools carry no quorum.
    #[instrument(skip(self), fields(pool = %pool_id))]
    pub async fn scale_node_pool(&self, pool_id: &PoolId, desired: usize) -> HealetResult<()> {
        let pool = self.ctx.cluster.get_node_pool(pool_id).await?;
        let bind = pool
            .bind
            .as_ref()
            .ok_or_else(|| InfraError::NotProvisioned(pool.id.clone()))?;
        self.ctx
            .provider
            .scale_node_pool(&bind.scaling_group_id, desired)
            .await?;
        info!(desired, "Scaled node pool");
        self.emit(HealEvent::PoolScaled {
            pool: pool.id.clone(),
            desired,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fleet, group, healet, id, ip};
    use heal_infra::memory::ProviderCall;
    use heal_infra::{ClusterApi, Provider};
    use heal_types::{ConsensusMemberId, NodePool, PoolBind, ScalingGroupId};
    use proptest::prelude::*;

    #[test]
    fn test_scale_in_targets() {
        assert_eq!(scale_in_target(3, 1), 2);
        assert_eq!(scale_in_target(2, 1), 1);
        assert_eq!(scale_in_target(5, 1), 3);
        assert_eq!(scale_in_target(7, 1), 4);
        assert_eq!(scale_in_target(7, 6), 6);
    }

    #[tokio::test]
    async fn test_equal_is_noop() {
        let f = fleet(&[1, 2, 3]).await;
        let healet = healet(&f);
        assert_eq!(
            healet.quorum_scale(3, 3).await.unwrap(),
            FixOutcome::Converged
        );
        assert!(f.provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_scale_out_goes_straight_to_desired() {
        let f = fleet(&[1]).await;
        let healet = healet(&f);

        healet.scale_master(3).await.unwrap();
        assert_eq!(
            f.provider.calls().await,
            vec![ProviderCall::ScaleMasterGroup {
                group: group(),
                desired: 3
            }]
        );
        assert_eq!(f.provider.instances(&group()).await.len(), 3);
    }

    #[tokio::test]
    async fn test_scale_in_takes_one_batch() {
        let f = fleet(&[1, 2, 3, 4, 5]).await;
        let healet = healet(&f);

        let err = healet.scale_master(1).await.unwrap_err();
        assert!(matches!(
            err,
            HealetError::Scale(ScaleError::NextBatch {
                reached: 3,
                desired: 1
            })
        ));
        assert_eq!(f.provider.instances(&group()).await.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_retires_members_before_releasing_machines() {
        let f = fleet(&[1, 2, 3, 4, 5]).await;
        let healet = healet(&f);

        assert_eq!(
            healet.quorum_scale(5, 3).await.unwrap(),
            FixOutcome::Repaired
        );

        let retired: Vec<_> = f.consensus.removed().await.into_iter().map(|m| m.ip).collect();
        assert_eq!(retired, vec![ip(5), ip(4)]);

        let entries = f.journal.entries().await;
        let last_member = entries
            .iter()
            .rposition(|e| e.starts_with("consensus.remove_member"))
            .unwrap();
        let first_machine = entries
            .iter()
            .position(|e| e.starts_with("provider.remove_scaling_group_ecs"))
            .unwrap();
        assert!(last_member < first_machine);
        assert!(!entries
            .iter()
            .any(|e| e.starts_with("provider.scale_master_group")));

        let instances = f.provider.instances(&group()).await;
        assert_eq!(instances.len(), 3);
        for member in f.consensus.members().await {
            assert!(instances.values().any(|i| i.ip == member.ip));
        }
    }

    #[tokio::test]
    async fn test_missing_host_aborts_before_any_removal() {
        let f = fleet(&[1, 2, 3]).await;
        f.provider
            .remove_scaling_group_ecs(&group(), &id(3))
            .await
            .unwrap();
        let healet = healet(&f);

        assert!(matches!(
            healet.quorum_scale(3, 2).await,
            Err(HealetError::NoInstanceForMember(addr)) if addr == ip(3)
        ));
        assert!(f.consensus.removed().await.is_empty());
    }

    #[tokio::test]
    async fn test_shrink_to_one_retires_member_before_machine() {
        let f = fleet(&[1, 2]).await;
        let healet = healet(&f);

        healet.quorum_scale(2, 1).await.unwrap();

        let removed = f.consensus.removed().await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ip, ip(2));
        let member = f.journal.position("consensus.remove_member").await.unwrap();
        let machine = f
            .journal
            .position("provider.remove_scaling_group_ecs")
            .await
            .unwrap();
        assert!(member < machine);
        assert_eq!(f.provider.instances(&group()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_leader_is_never_retired() {
        let f = fleet(&[1, 2]).await;
        f.consensus.set_leader(ConsensusMemberId::new(2)).await;
        let healet = healet(&f);

        healet.quorum_scale(2, 1).await.unwrap();
        assert_eq!(f.consensus.removed().await[0].ip, ip(1));
    }

    #[tokio::test]
    async fn test_unhealthy_control_plane_blocks_scale() {
        let f = fleet(&[1, 2, 3]).await;
        f.consensus.set_unhealthy(ConsensusMemberId::new(3)).await;
        let healet = healet(&f);

        assert!(!healet.healthy().await.unwrap());
        assert!(matches!(
            healet.scale_master(1).await,
            Err(HealetError::Scale(ScaleError::Unhealthy))
        ));
        assert!(f.provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_control_plane_is_unhealthy() {
        let f = fleet(&[1, 2]).await;
        f.cluster.delete_master("i-2").await.ok();
        let healet = healet(&f);
        assert!(!healet.healthy().await.unwrap());
    }

    #[tokio::test]
    async fn test_scale_node_pool_requires_bind() {
        let f = fleet(&[1]).await;
        let bound = NodePool::new(heal_types::PoolId::new("np-1"), "a", 1).with_bind(PoolBind {
            scaling_group_id: ScalingGroupId::new("asg-np"),
            scaling_config_id: "scfg".to_string(),
        });
        let unbound = NodePool::new(heal_types::PoolId::new("np-2"), "b", 1);
        f.cluster.insert_pool(bound.clone()).await;
        f.cluster.insert_pool(unbound.clone()).await;
        let healet = healet(&f);

        healet.scale_node_pool(&bound.id, 4).await.unwrap();
        assert_eq!(
            f.provider
                .instances(&ScalingGroupId::new("asg-np"))
                .await
                .len(),
            4
        );
        assert!(healet.scale_node_pool(&unbound.id, 4).await.is_err());
    }

    proptest! {
        #[test]
        fn property_scale_in_step_is_bounded(current in 2usize..64, desired in 1usize..64) {
            prop_assume!(desired < current);
            let target = scale_in_target(current, desired);
            let floor = desired.max(current / 2);
            prop_assert!(target >= floor);
            prop_assert!(target < current);
            prop_assert!(target >= desired);
        }

        #[test]
        fn property_repeated_steps_reach_desired(current in 2usize..64, desired in 1usize..64) {
            prop_assume!(desired < current);
            let mut replicas = current;
            let mut steps = 0;
            while replicas > desired {
                replicas = scale_in_target(replicas, desired);
                steps += 1;
                prop_assert!(steps <= current);
            }
            prop_assert_eq!(replicas, desired);
        }
    }
}

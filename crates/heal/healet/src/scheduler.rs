//! Healet run loop
//!
//! A single consumer selects over the task queue, the steady-state tick and
//! a shutdown signal. Work never runs in parallel: the cycle mutex makes a
//! concurrent trigger wait for the in-flight cycle and then observe fresh
//! state. A task waiting out a requeue delay is held once; further requeues
//! of the same task while it waits are dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{HealetError, HealetResult};
use crate::events::FixOutcome;
use crate::healet::Healet;
use crate::queue::{HealTask, TaskQueue, TaskReceiver};

impl Healet {
    /// Execute one task. Admission and scaling sentinels become
    /// [`FixOutcome::RequeueAfter`].
    pub async fn process(&self, task: &HealTask) -> HealetResult<FixOutcome> {
        let result = match task {
            HealTask::FixMaster => self.fix_master_node().await,
            HealTask::FixNodePool(pool) => self.fix_node_pool(pool).await,
            HealTask::QuorumScale { desired } => self.scale_master(*desired).await,
        };
        match result {
            Err(e) => match e.requeue_after(self.config.operation.retry_after) {
                Some(after) => {
                    debug!(?task, reason = %e, "Requeueing task");
                    Ok(FixOutcome::RequeueAfter(after))
                }
                None => Err(e),
            },
            ok => ok,
        }
    }

    /// Process everything queued right now, in order.
    pub async fn drain(
        &self,
        tasks: &mut TaskReceiver,
    ) -> Vec<(HealTask, HealetResult<FixOutcome>)> {
        let mut results = Vec::new();
        for task in tasks.drain() {
            let result = self.process(&task).await;
            results.push((task, result));
        }
        results
    }

    /// Tasks for the steady-state check: the control plane, a scale step
    /// when the declared master set is not met, and every provisioned node
    /// pool.
    pub async fn steady_state_tasks(&self) -> Vec<HealTask> {
        let mut tasks = vec![HealTask::FixMaster];
        if let Some(scale) = self.declared_scale().await {
            tasks.push(scale);
        }
        match self.ctx.cluster.list_node_pools().await {
            Ok(pools) => tasks.extend(
                pools
                    .into_iter()
                    .filter(|p| p.is_provisioned())
                    .map(|p| HealTask::FixNodePool(p.id)),
            ),
            Err(e) => warn!(error = %e, "Listing node pools failed"),
        }
        tasks
    }

    /// A scale task towards the declared master set, if the control-plane
    /// group holds a different number of machines. A cluster without a
    /// declaration is left alone.
    async fn declared_scale(&self) -> Option<HealTask> {
        let desired = match self.ctx.cluster.get_master_set().await {
            Ok(set) if set.desired == 0 => {
                warn!("Ignoring master set with zero replicas");
                return None;
            }
            Ok(set) => set.desired,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                warn!(error = %e, "Reading master set failed");
                return None;
            }
        };
        match self.ctx.infra.control_plane_ecs().await {
            Ok(machines) if machines.len() != desired => {
                debug!(current = machines.len(), desired, "Master set not met");
                Some(HealTask::QuorumScale { desired })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Listing control-plane machines failed");
                None
            }
        }
    }

    async fn handle(&self, queue: &TaskQueue, task: HealTask) {
        match self.process(&task).await {
            Ok(FixOutcome::RequeueAfter(after)) => self.requeue(queue, task, after).await,
            Ok(outcome) => debug!(?task, ?outcome, "Task done"),
            Err(e) => error!(?task, error = %e, "Heal task failed"),
        }
    }

    /// Resubmit `task` after `after` without blocking the loop, unless the
    /// same task is already waiting.
    async fn requeue(&self, queue: &TaskQueue, task: HealTask, after: Duration) {
        if !self.pending.lock().await.insert(task.clone()) {
            debug!(?task, "Task already waiting for requeue");
            return;
        }

        let queue = queue.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            pending.lock().await.remove(&task);
            match queue.submit(task).await {
                Ok(()) | Err(HealetError::QueueClosed) => {}
                Err(e) => warn!(error = %e, "Requeue failed"),
            }
        });
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    pub async fn run(
        self: Arc<Self>,
        queue: TaskQueue,
        mut tasks: TaskReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(tick = ?self.config.tick_interval, "Healet started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for task in self.steady_state_tasks().await {
                        self.handle(&queue, task).await;
                    }
                }
                Some(task) = tasks.recv() => {
                    self.handle(&queue, task).await;
                }
            }
        }

        info!("Healet stopped");
    }
}

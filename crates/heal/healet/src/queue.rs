//! Bounded task queue feeding a healet.
//!
//! Membership watchers and operators submit tasks; the healet's run loop is
//! the single consumer. `submit` waits for capacity, `try_submit` fails fast.

use heal_types::PoolId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{HealetError, HealetResult};

/// Work a healet can be asked to do
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealTask {
    /// Run a control-plane fix cycle.
    FixMaster,
    /// Run a fix cycle for one worker pool.
    FixNodePool(PoolId),
    /// Move the control plane one quorum-safe step towards `desired`.
    QuorumScale { desired: usize },
}

/// Create a queue with the given capacity.
pub fn channel(capacity: usize) -> (TaskQueue, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TaskQueue { tx }, TaskReceiver { rx })
}

/// Submitting half
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<HealTask>,
}

impl TaskQueue {
    /// Submit, waiting for capacity.
    pub async fn submit(&self, task: HealTask) -> HealetResult<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| HealetError::QueueClosed)
    }

    /// Submit without waiting.
    pub fn try_submit(&self, task: HealTask) -> HealetResult<()> {
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HealetError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => HealetError::QueueClosed,
        })
    }
}

/// Consuming half
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::Receiver<HealTask>,
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<HealTask> {
        self.rx.recv().await
    }

    /// Everything queued right now, without waiting.
    pub fn drain(&mut self) -> Vec<HealTask> {
        let mut tasks = Vec::new();
        while let Ok(task) = self.rx.try_recv() {
            tasks.push(task);
        }
        tasks
    }
}

//! Error types for heal-healet crate.

use std::net::IpAddr;
use std::time::Duration;

use heal_infra::InfraError;
use heal_operation::OperationError;
use heal_triple::TripleError;
use thiserror::Error;

/// Sentinels returned by control-plane scaling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    /// One step was taken; re-evaluate from fresh state before the next.
    #[error("scaled to {reached}, retry next batch towards {desired}")]
    NextBatch { reached: usize, desired: usize },

    /// The control plane is not healthy enough to scale.
    #[error("control plane unhealthy, scale deferred")]
    Unhealthy,
}

/// Errors that abort a fix cycle or a scale request.
#[derive(Debug, Error)]
pub enum HealetError {
    #[error(transparent)]
    Triple(#[from] TripleError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Scale(#[from] ScaleError),

    /// No consensus follower left to retire.
    #[error("no consensus follower available")]
    NoFollower,

    /// A consensus member has no control-plane instance behind it.
    #[error("no control-plane instance with address {0}")]
    NoInstanceForMember(IpAddr),

    /// Task queue is at capacity.
    #[error("task queue full")]
    QueueFull,

    /// Task queue receiver is gone.
    #[error("task queue closed")]
    QueueClosed,
}

impl HealetError {
    /// Delay after which the failed work should be requeued, for the
    /// "come back later" signals. `None` for real failures.
    pub fn requeue_after(&self, default: Duration) -> Option<Duration> {
        match self {
            HealetError::Operation(e) => e.retry_after(),
            HealetError::Scale(_) => Some(default),
            _ => None,
        }
    }
}

/// Result type for orchestrator operations.
pub type HealetResult<T> = Result<T, HealetError>;

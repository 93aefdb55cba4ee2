//! Error types for heal-operation crate.

use std::time::Duration;

use heal_infra::InfraError;
use heal_types::InstanceId;
use thiserror::Error;

/// Errors raised by node operations.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Admission denied; come back after the given delay. Not a failure.
    #[error("retry after {after:?}")]
    Retry { after: Duration },

    /// The machine did not come back after a reset.
    #[error("repair failed, continue on next node: {instance_id}")]
    RepairFailed { instance_id: InstanceId },

    /// No ready heartbeat observed within the bounded wait.
    #[error("heartbeat timeout for {instance_id} after {timeout:?}")]
    HeartbeatTimeout {
        instance_id: InstanceId,
        timeout: Duration,
    },

    /// The row has no live instance to act on.
    #[error("no backing instance for {0}")]
    NoInstance(String),

    /// No membership record resolves for the instance.
    #[error("no membership record for instance {0}")]
    NoRecord(InstanceId),

    /// Collaborator failure.
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl OperationError {
    /// Whether this is the admission sentinel rather than a failure.
    pub fn is_retry(&self) -> bool {
        matches!(self, OperationError::Retry { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OperationError::Retry { after } => Some(*after),
            _ => None,
        }
    }
}

/// Result type for node operations.
pub type OperationResult<T> = Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_sentinel() {
        let retry = OperationError::Retry {
            after: Duration::from_secs(30),
        };
        assert!(retry.is_retry());
        assert_eq!(retry.retry_after(), Some(Duration::from_secs(30)));

        let failed = OperationError::RepairFailed {
            instance_id: InstanceId::new("i-1"),
        };
        assert!(!failed.is_retry());
        assert_eq!(failed.retry_after(), None);
        assert_eq!(
            failed.to_string(),
            "repair failed, continue on next node: i-1"
        );
    }
}

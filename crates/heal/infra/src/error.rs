//! Error types for heal-infra crate.
//!
//! Collaborator failures are transient from the engine's point of view: the
//! current phase aborts and the next cycle retries.

use heal_types::{InstanceId, PoolId, TypesError};
use thiserror::Error;

/// Errors raised by collaborators.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Resource does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Resource already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// Node pool has no scaling group bound yet.
    #[error("node pool {0} is not provisioned")]
    NotProvisioned(PoolId),

    /// Cluster descriptor carries no stack binding.
    #[error("cluster {0} has no stack binding")]
    MissingStackBinding(String),

    /// Stack lookup did not return a required output.
    #[error("stack {stack_id} has no output {key}")]
    MissingStackOutput { stack_id: String, key: String },

    /// Remote command exited unsuccessfully.
    #[error("command on {instance_id} exited with {exit_code}: {output}")]
    CommandFailed {
        instance_id: InstanceId,
        exit_code: i32,
        output: String,
    },

    /// Cloud provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Consensus store call failed.
    #[error("consensus error: {0}")]
    Consensus(String),

    /// Cluster API call failed.
    #[error("cluster api error: {0}")]
    Api(String),

    /// Malformed model value.
    #[error(transparent)]
    Types(#[from] TypesError),
}

impl InfraError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        InfraError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, InfraError::NotFound { .. })
    }
}

/// Result type for collaborator calls.
pub type InfraResult<T> = Result<T, InfraError>;

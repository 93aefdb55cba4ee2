//! HEAL Operation - Repair executor for a single machine
//!
//! A [`NodeOperation`] is bound to one correlated row and exposes the repair
//! primitives: agent restart, remote command, label, cordon, drain and full
//! machine reset. Destructive actions are gated by time-window admission
//! control; a denied gate surfaces as [`OperationError::Retry`], which
//! callers treat as "reschedule later", not as a failure.

mod admission;
mod bootstrap;
mod config;
mod error;
mod operation;

pub use admission::{admit_ecs, admit_fresh, admit_node, Admission};
pub use bootstrap::BootstrapData;
pub use config::OperationConfig;
pub use error::{OperationError, OperationResult};
pub use operation::{remove_consensus_member_by_ip, NodeOperation, OperationMgr, RESTART_AGENT};

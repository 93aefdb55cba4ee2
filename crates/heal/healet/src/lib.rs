//! HEAL Healet - Reconciliation orchestrator
//!
//! A [`Healet`] owns the fix cycle for one cluster:
//! - `fix_master_node` reconciles control-plane registry entries, consensus
//!   membership and machines, in that order
//! - `fix_node_pool` labels and repairs the machines of one worker pool
//! - `scale_master` moves the control plane towards a replica count without
//!   ever removing more than about half of the consensus group at once
//!
//! Work arrives through a bounded [`TaskQueue`] and a periodic tick, and is
//! processed by [`Healet::run`] one task at a time.

mod config;
mod error;
mod events;
mod healet;
pub mod queue;
mod scale;
mod scheduler;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::HealetConfig;
pub use error::{HealetError, HealetResult, ScaleError};
pub use events::{FixOutcome, HealEvent, HealEventEnvelope, RepairAction};
pub use healet::Healet;
pub use queue::{HealTask, TaskQueue, TaskReceiver};
pub use scale::scale_in_target;

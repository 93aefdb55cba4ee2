//! Orchestrator configuration.

use std::time::Duration;

use heal_operation::OperationConfig;
use serde::{Deserialize, Serialize};

/// Configuration for one healet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealetConfig {
    /// Interval of the steady-state check.
    pub tick_interval: Duration,

    /// Capacity of the task queue; submitters wait when it is full.
    pub queue_capacity: usize,

    /// Capacity of the event broadcast buffer.
    pub event_capacity: usize,

    /// Repair executor settings.
    pub operation: OperationConfig,
}

impl Default for HealetConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            queue_capacity: 16,
            event_capacity: 256,
            operation: OperationConfig::default(),
        }
    }
}

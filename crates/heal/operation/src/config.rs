//! Repair executor configuration.
//!
//! Admission windows and bounded-wait timeouts for machine repairs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for node operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    /// Minimum time between two resets of the same instance.
    pub ecs_admit_window: Duration,

    /// How long a record must stay unready before it is repaired.
    pub node_admit_window: Duration,

    /// Instances younger than this are still booting and never repaired.
    pub fresh_instance_age: Duration,

    /// Bound on the heartbeat wait after a reset.
    pub heartbeat_timeout: Duration,

    /// Interval between heartbeat polls.
    pub heartbeat_poll_interval: Duration,

    /// Bound on the heartbeat wait after a restart.
    pub restart_verify_timeout: Duration,

    /// Requeue delay when admission is denied without a better estimate.
    pub retry_after: Duration,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            ecs_admit_window: Duration::from_secs(3 * 60),
            node_admit_window: Duration::from_secs(60),
            fresh_instance_age: Duration::from_secs(5 * 60),
            heartbeat_timeout: Duration::from_secs(10 * 60),
            heartbeat_poll_interval: Duration::from_secs(10),
            restart_verify_timeout: Duration::from_secs(3 * 60),
            retry_after: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = OperationConfig::default();
        assert_eq!(config.ecs_admit_window, Duration::from_secs(180));
        assert_eq!(config.node_admit_window, Duration::from_secs(60));
        assert_eq!(config.fresh_instance_age, Duration::from_secs(300));
        assert!(config.heartbeat_poll_interval < config.restart_verify_timeout);
        assert!(config.restart_verify_timeout < config.heartbeat_timeout);
    }
}

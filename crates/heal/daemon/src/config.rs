//! Configuration for heal-daemon

use std::time::Duration;

use heal_healet::HealetConfig;
use heal_operation::OperationConfig;
use serde::{Deserialize, Serialize};

use crate::error::DaemonResult;

/// Main daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Cluster identity
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Fix cycle scheduling
    #[serde(default)]
    pub healet: HealetSettings,

    /// Admission windows and repair timeouts
    #[serde(default)]
    pub operation: OperationSettings,

    /// Collaborator backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,

    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            region: default_region(),
        }
    }
}

/// Healet scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealetSettings {
    /// Steady-state check interval in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Task queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Event broadcast buffer
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for HealetSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            queue_capacity: default_queue_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Admission windows and timeouts, all in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSettings {
    #[serde(default = "default_ecs_admit_window")]
    pub ecs_admit_window_secs: u64,

    #[serde(default = "default_node_admit_window")]
    pub node_admit_window_secs: u64,

    #[serde(default = "default_fresh_instance_age")]
    pub fresh_instance_age_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_heartbeat_poll_interval")]
    pub heartbeat_poll_interval_secs: u64,

    #[serde(default = "default_restart_verify_timeout")]
    pub restart_verify_timeout_secs: u64,

    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            ecs_admit_window_secs: default_ecs_admit_window(),
            node_admit_window_secs: default_node_admit_window(),
            fresh_instance_age_secs: default_fresh_instance_age(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            heartbeat_poll_interval_secs: default_heartbeat_poll_interval(),
            restart_verify_timeout_secs: default_restart_verify_timeout(),
            retry_after_secs: default_retry_after(),
        }
    }
}

impl From<&OperationSettings> for OperationConfig {
    fn from(s: &OperationSettings) -> Self {
        Self {
            ecs_admit_window: Duration::from_secs(s.ecs_admit_window_secs),
            node_admit_window: Duration::from_secs(s.node_admit_window_secs),
            fresh_instance_age: Duration::from_secs(s.fresh_instance_age_secs),
            heartbeat_timeout: Duration::from_secs(s.heartbeat_timeout_secs),
            heartbeat_poll_interval: Duration::from_secs(s.heartbeat_poll_interval_secs),
            restart_verify_timeout: Duration::from_secs(s.restart_verify_timeout_secs),
            retry_after: Duration::from_secs(s.retry_after_secs),
        }
    }
}

/// Collaborator backend. Cloud, consensus and cluster clients are external;
/// only the simulated in-memory fleet ships with the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Control-plane machines to seed
    #[serde(default = "default_masters")]
    pub masters: usize,

    /// Control-plane machines seeded with a stale unready record, so the
    /// first cycles have something to repair
    #[serde(default)]
    pub unready_masters: usize,

    /// Worker pools to seed
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolSeed>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            masters: default_masters(),
            unready_masters: 0,
            pools: default_pools(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Simulated in-memory fleet
    #[default]
    Memory,
}

/// A worker pool in the simulated fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSeed {
    pub id: String,
    pub name: String,
    pub size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_cluster_name() -> String {
    "local".to_string()
}

fn default_region() -> String {
    "cn-hangzhou".to_string()
}

fn default_tick_interval() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    16
}

fn default_event_capacity() -> usize {
    256
}

fn default_ecs_admit_window() -> u64 {
    180
}

fn default_node_admit_window() -> u64 {
    60
}

fn default_fresh_instance_age() -> u64 {
    300
}

fn default_heartbeat_timeout() -> u64 {
    600
}

fn default_heartbeat_poll_interval() -> u64 {
    10
}

fn default_restart_verify_timeout() -> u64 {
    180
}

fn default_retry_after() -> u64 {
    30
}

fn default_masters() -> usize {
    3
}

fn default_pools() -> Vec<PoolSeed> {
    vec![PoolSeed {
        id: "np-default".to_string(),
        name: "default".to_string(),
        size: 2,
    }]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `HEAL_`
    /// environment variables (`HEAL_HEALET__TICK_INTERVAL_SECS=30`).
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HEAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Healet settings with the operation windows embedded
    pub fn healet_config(&self) -> HealetConfig {
        HealetConfig {
            tick_interval: Duration::from_secs(self.healet.tick_interval_secs.max(1)),
            queue_capacity: self.healet.queue_capacity,
            event_capacity: self.healet.event_capacity.max(1),
            operation: OperationConfig::from(&self.operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.cluster.name, "local");
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.backend.masters, 3);
        assert_eq!(config.backend.pools.len(), 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_defaults_match_library_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.healet_config(), HealetConfig::default());
    }

    #[test]
    fn test_zero_tick_is_clamped() {
        let mut config = DaemonConfig::default();
        config.healet.tick_interval_secs = 0;
        assert_eq!(config.healet_config().tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("heald-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[cluster]
name = "prod"

[healet]
tick_interval_secs = 15

[operation]
node_admit_window_secs = 120

[backend]
masters = 5

[[backend.pools]]
id = "np-gpu"
name = "gpu"
size = 4
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.cluster.name, "prod");
        assert_eq!(config.cluster.region, "cn-hangzhou");
        assert_eq!(config.backend.masters, 5);
        assert_eq!(config.backend.pools[0].id, "np-gpu");
        assert_eq!(config.backend.pools[0].size, 4);

        let healet = config.healet_config();
        assert_eq!(healet.tick_interval, Duration::from_secs(15));
        assert_eq!(healet.operation.node_admit_window, Duration::from_secs(120));
        assert_eq!(healet.operation.ecs_admit_window, Duration::from_secs(180));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = DaemonConfig::load(Some("/nonexistent/heald")).unwrap();
        assert_eq!(config.backend.masters, 3);
        assert_eq!(config.healet.tick_interval_secs, 60);
    }
}

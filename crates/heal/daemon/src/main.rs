//! HEAL Daemon - Background self-healing service
//!
//! Runs a healet against the configured backend: a steady-state fix cycle
//! for the control plane and every provisioned node pool, scaling the
//! control plane towards the declared replica count.

use anyhow::Context;
use clap::Parser;
use heal_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// HEAL Daemon CLI
#[derive(Debug, Parser)]
#[command(name = "heald")]
#[command(about = "HEAL Daemon - Cluster self-healing service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HEAL_CONFIG")]
    config: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "HEAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HEAL_LOG_JSON")]
    json: bool,

    /// Steady-state check interval in seconds
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Declare the control-plane replica count
    #[arg(long)]
    scale_masters: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json {
            config.logging.json = true;
        }
        if let Some(secs) = self.tick_secs {
            config.healet.tick_interval_secs = secs;
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    init_tracing(&config.logging.level, config.logging.json);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cluster = %config.cluster.name,
        region = %config.cluster.region,
        tick_secs = config.healet.tick_interval_secs,
        "Starting HEAL daemon"
    );

    let server = Server::new(config)
        .await
        .context("failed to start HEAL daemon")?;

    if let Some(desired) = cli.scale_masters {
        server.declare_masters(desired).await;
    }

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["heald", "--log-level", "debug", "--tick-secs", "5", "--json"]);
        let mut config = DaemonConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.healet.tick_interval_secs, 5);
    }

    #[test]
    fn test_cli_keeps_config_when_unset() {
        let cli = Cli::parse_from(["heald", "--scale-masters", "5"]);
        let mut config = DaemonConfig::default();
        cli.apply(&mut config);

        assert_eq!(config, DaemonConfig::default());
        assert_eq!(cli.scale_masters, Some(5));
    }
}

//! Error types for heal-daemon

use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The simulated fleet cannot be built from the configuration
    #[error("Invalid fleet seed: {0}")]
    Seed(String),

    /// The healet loop panicked or was cancelled
    #[error("Healet task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

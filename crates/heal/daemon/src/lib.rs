//! HEAL Daemon library
//!
//! Components of the `heald` binary:
//! - Layered configuration (defaults, file, `HEAL_` environment)
//! - Simulated in-memory fleet backend
//! - Server lifecycle: healet loop, event log, graceful shutdown

pub mod backend;
pub mod config;
pub mod error;
pub mod server;

pub use backend::MemoryBackend;
pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use server::Server;

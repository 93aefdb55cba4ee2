//! Daemon lifecycle
//!
//! Wires the simulated backend into one healet, runs its loop and forwards
//! its event stream to the log until a shutdown signal arrives.

use std::future::Future;
use std::sync::Arc;

use heal_healet::{queue, HealEventEnvelope, Healet, TaskQueue, TaskReceiver};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::backend::MemoryBackend;
use crate::config::DaemonConfig;
use crate::error::DaemonResult;

/// HEAL daemon server
pub struct Server {
    backend: MemoryBackend,
    healet: Arc<Healet>,
    queue: TaskQueue,
    tasks: TaskReceiver,
}

impl Server {
    /// Seed the backend and create the healet
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let backend = MemoryBackend::seed(&config.cluster, &config.backend).await?;
        let healet_config = config.healet_config();
        let (queue, tasks) = queue::channel(healet_config.queue_capacity);
        let healet = Arc::new(Healet::new(backend.context(), healet_config));

        Ok(Self {
            backend,
            healet,
            queue,
            tasks,
        })
    }

    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    pub fn healet(&self) -> Arc<Healet> {
        self.healet.clone()
    }

    /// Submitting half of the healet's task queue
    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    /// Declare the control-plane replica count. The steady-state check
    /// moves the group towards it one quorum-safe step at a time.
    pub async fn declare_masters(&self, desired: usize) {
        info!(desired, "Declared control-plane replica count");
        self.backend.cluster.set_master_set(desired).await;
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then stop the healet after its
    /// in-flight task.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> DaemonResult<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let events = tokio::spawn(log_events(self.healet.subscribe()));
        let healet = tokio::spawn(
            self.healet
                .clone()
                .run(self.queue.clone(), self.tasks, shutdown_rx),
        );

        info!("HEAL daemon running");
        signal.await;
        info!("HEAL daemon shutting down");

        let _ = shutdown_tx.send(true);
        healet.await?;
        events.abort();

        Ok(())
    }
}

/// Forward healet events to the log as JSON.
async fn log_events(mut rx: broadcast::Receiver<HealEventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => info!(target: "heal::events", event = %json, "Heal event"),
                Err(e) => warn!(error = %e, "Failed to encode heal event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

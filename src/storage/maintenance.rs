use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::registry::PayloadRegistry;
use crate::constants::MAINTENANCE_INTERVAL;

/// Background task calling [`PayloadRegistry::tick`] on a fixed period.
///
/// Each tick runs on the blocking pool, since it writes files and takes
/// payload locks.
///
/// Dropping the handle stops the task after its current tick.
pub struct MaintenanceHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Spawns the task on the current tokio runtime. The first tick happens
    /// one `period` from now.
    pub fn spawn(registry: Arc<PayloadRegistry>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run(registry, period, shutdown_rx));
        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Spawns the task with the default period.
    pub fn start(registry: Arc<PayloadRegistry>) -> Self {
        Self::spawn(registry, MAINTENANCE_INTERVAL)
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

async fn run(registry: Arc<PayloadRegistry>, period: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                break;
            }
            _ = ticker.tick() => {
                let registry = Arc::clone(&registry);
                let ticked = tokio::task::spawn_blocking(move || {
                    registry.tick(std::time::Instant::now());
                })
                .await;
                if let Err(e) = ticked {
                    tracing::warn!(error = %e, "storage maintenance tick failed");
                }
            }
        }
    }
    tracing::debug!("storage maintenance stopped");
}

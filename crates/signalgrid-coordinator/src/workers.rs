//! Supervised background workers.
//!
//! Each worker is a named loop that runs one cycle per interval until its
//! shutdown signal fires. Every cycle runs in its own task, so an error or
//! a panic in one cycle is logged and followed by a backoff without ending
//! the worker, and workers never share a failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One cycle of a worker.
pub type CycleFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

pub type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns the coordinator's periodic tasks.
pub struct BackgroundWorkers {
    workers: RwLock<HashMap<String, WorkerSlot>>,
    /// Pause after a failed cycle.
    backoff: Duration,
}

impl BackgroundWorkers {
    pub fn new(backoff: Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            backoff,
        }
    }

    /// Start (or restart) the worker `name`.
    pub async fn start(&self, name: &str, interval: Duration, cycle: CycleFn) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(
            name.to_string(),
            interval,
            self.backoff,
            cycle,
            shutdown_rx,
        ));

        let mut workers = self.workers.write().await;
        if let Some(old) = workers.insert(
            name.to_string(),
            WorkerSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        info!(worker = %name, interval_ms = interval.as_millis() as u64, "worker started");
    }

    /// Stop `name` and wait for its current cycle to finish.
    pub async fn stop(&self, name: &str) -> bool {
        let slot = self.workers.write().await.remove(name);
        match slot {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                let _ = slot.handle.await;
                info!(worker = %name, "worker stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every worker (for graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<(String, WorkerSlot)> = self.workers.write().await.drain().collect();
        for (_, slot) in &slots {
            let _ = slot.shutdown_tx.send(true);
        }
        for (name, slot) in slots {
            let _ = slot.handle.await;
            debug!(worker = %name, "worker stopped");
        }
        info!("all workers stopped");
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.workers
            .read()
            .await
            .get(name)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    /// Names of active workers, sorted.
    pub async fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

async fn run_worker(
    name: String,
    interval: Duration,
    backoff: Duration,
    cycle: CycleFn,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = %name, "worker loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let failed = match tokio::spawn(cycle()).await {
                    Ok(Ok(())) => false,
                    Ok(Err(e)) => {
                        warn!(worker = %name, error = %e, "worker cycle failed");
                        true
                    }
                    Err(e) => {
                        error!(worker = %name, error = %e, "worker cycle panicked");
                        true
                    }
                };
                if failed {
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!(worker = %name, "worker loop shutting down");
}

//! Node mode — joins the grid and runs until Ctrl-C.
//!
//! 1. Opens the coordination store and loads the cluster view
//! 2. Registers this process as a node
//! 3. Starts the background workers, the heartbeat loop and the scaling engine
//! 4. On shutdown, drains the node and stops everything

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use signalgrid_autoscale::ScalingEngine;
use signalgrid_coordinator::{CoordinatorError, GridService};
use signalgrid_core::{GridConfig, PodKind};
use signalgrid_state::{CoordinationStore, StateStore};

/// How often the scaling engine polls the monitor.
const SCALING_INTERVAL: Duration = Duration::from_secs(30);

pub fn load_config(path: Option<&Path>) -> anyhow::Result<GridConfig> {
    let config = match path {
        Some(path) => {
            let config = GridConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            config
        }
        None => GridConfig::default(),
    };
    Ok(config)
}

pub async fn run_node(
    config: GridConfig,
    node_id: String,
    capacity: u32,
    data_dir: PathBuf,
    replicas: u32,
) -> anyhow::Result<()> {
    info!(%node_id, capacity, "SignalGrid daemon starting");
    std::fs::create_dir_all(&data_dir)?;

    // ── Coordination store ─────────────────────────────────────
    let db_path = data_dir.join("signalgrid.redb");
    let store: Arc<dyn CoordinationStore> = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "coordination store opened");

    // ── Service ────────────────────────────────────────────────
    let heartbeat_interval = config.registry.heartbeat_interval;
    let mut engine = ScalingEngine::new(&config.scaling);
    let service = Arc::new(GridService::<PodKind>::new(Some(store), config)?);
    service.init().await?;
    service.register_node(&node_id, capacity).await?;
    service.start_workers().await;

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = {
        let service = Arc::clone(&service);
        let node_id = node_id.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            run_heartbeat(service, node_id, capacity, heartbeat_interval, shutdown).await;
        })
    };

    let monitor = Arc::clone(service.monitor());
    let scaling_handle = tokio::spawn(async move {
        engine
            .run(monitor, replicas, SCALING_INTERVAL, shutdown_rx)
            .await;
    });

    // ── Wait for shutdown ──────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = heartbeat_handle.await;
    let _ = scaling_handle.await;

    match service.unregister_node(&node_id).await {
        Ok(evacuation) => info!(
            %node_id,
            reassigned = evacuation.reassigned,
            unassigned = evacuation.unassigned,
            "node drained"
        ),
        Err(CoordinatorError::NodeNotFound(_)) => {
            warn!(%node_id, "node already removed from the grid")
        }
        Err(e) => error!(%node_id, error = %e, "drain on shutdown failed"),
    }
    service.shutdown().await;

    info!("SignalGrid daemon stopped");
    Ok(())
}

/// Heartbeat this process's node until shutdown.
///
/// Usage comes from the latest sample reported through `report_metrics`;
/// this binary samples nothing itself, so until a workload reports, the node
/// heartbeats as idle and never turns OVERLOADED. A node failed over by
/// another process while this one was stalled registers again on the next
/// tick.
async fn run_heartbeat(
    service: Arc<GridService>,
    node_id: String,
    capacity: u32,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match service.heartbeat_from_metrics(&node_id) {
                    Ok(()) => {}
                    Err(CoordinatorError::NodeNotFound(_)) => {
                        warn!(%node_id, "own node missing from registry, registering again");
                        if let Err(e) = service.register_node(&node_id, capacity).await {
                            warn!(%node_id, error = %e, "re-registration failed");
                        }
                    }
                    Err(e) => warn!(%node_id, error = %e, "heartbeat failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        assert_eq!(load_config(None).unwrap(), GridConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signalgrid.toml");
        std::fs::write(&path, "[registry]\nheartbeat_timeout = \"90s\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.registry.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(config.ring.virtual_nodes, 150);
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signalgrid.toml");
        std::fs::write(&path, "[store]\ntimeout = \"soon\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}

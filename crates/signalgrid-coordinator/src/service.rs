//! `GridService` — the operations a service process exposes upstream.
//!
//! Assembles one assignment coordinator, the backpressure monitor and the
//! background workers behind an explicit `init` / `start_workers` /
//! `shutdown` lifecycle. Callers hold the service; there are no globals.

use std::sync::Arc;

use tracing::{info, warn};

use signalgrid_backpressure::{BackpressureLevel, BackpressureMonitor, MetricsSample, ScalingRecommendation};
use signalgrid_cluster::Heartbeat;
use signalgrid_core::{GridConfig, NodeId, PodKind, ResourceKind};
use signalgrid_state::CoordinationStore;

use crate::coordinator::{AssignmentCoordinator, ClusterStatus, Evacuation, SweepReport};
use crate::error::CoordinatorResult;
use crate::workers::{BackgroundWorkers, CycleFn};

/// Worker names.
pub const SWEEP_WORKER: &str = "health-sweep";
pub const REBALANCE_WORKER: &str = "rebalance";
pub const PERSIST_WORKER: &str = "persist";
pub const RESYNC_WORKER: &str = "resync";

pub struct GridService<K: ResourceKind = PodKind> {
    config: GridConfig,
    coordinator: Arc<AssignmentCoordinator<K>>,
    monitor: Arc<BackpressureMonitor>,
    workers: BackgroundWorkers,
}

impl<K: ResourceKind> GridService<K> {
    /// Build the service. A missing store is a `Configuration` error.
    pub fn new(
        store: Option<Arc<dyn CoordinationStore>>,
        config: GridConfig,
    ) -> CoordinatorResult<Self> {
        let mut builder = AssignmentCoordinator::<K>::builder(config.clone());
        if let Some(store) = store {
            builder = builder.store(store);
        }
        let coordinator = Arc::new(builder.build()?);
        Ok(Self {
            monitor: Arc::new(BackpressureMonitor::new(&config.backpressure)),
            workers: BackgroundWorkers::new(config.store.error_backoff),
            coordinator,
            config,
        })
    }

    pub fn coordinator(&self) -> &Arc<AssignmentCoordinator<K>> {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<BackpressureMonitor> {
        &self.monitor
    }

    pub fn workers(&self) -> &BackgroundWorkers {
        &self.workers
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Load the cluster view from the store.
    pub async fn init(&self) -> CoordinatorResult<()> {
        self.coordinator.resync().await?;
        info!(
            kind = K::NAME,
            nodes = self.coordinator.registry().len(),
            assignments = self.coordinator.assignment_count(),
            "grid service initialized"
        );
        Ok(())
    }

    /// Start the health-sweep, rebalance, persistence and resync workers.
    pub async fn start_workers(self: &Arc<Self>) {
        let service = Arc::clone(self);
        self.workers
            .start(
                SWEEP_WORKER,
                self.config.registry.sweep_interval,
                cycle(move || {
                    let service = Arc::clone(&service);
                    async move {
                        let report = service.health_sweep().await;
                        match report.errors.first() {
                            Some((node_id, e)) => {
                                anyhow::bail!("sweep incomplete at {node_id}: {e}")
                            }
                            None => Ok(()),
                        }
                    }
                }),
            )
            .await;

        let coordinator = Arc::clone(&self.coordinator);
        self.workers
            .start(
                REBALANCE_WORKER,
                self.config.rebalance.check_interval,
                cycle(move || {
                    let coordinator = Arc::clone(&coordinator);
                    async move {
                        coordinator.rebalance_cycle().await?;
                        Ok(())
                    }
                }),
            )
            .await;

        let coordinator = Arc::clone(&self.coordinator);
        self.workers
            .start(
                PERSIST_WORKER,
                self.config.store.persist_debounce,
                cycle(move || {
                    let coordinator = Arc::clone(&coordinator);
                    async move {
                        coordinator.persist_dirty().await?;
                        Ok(())
                    }
                }),
            )
            .await;

        let coordinator = Arc::clone(&self.coordinator);
        self.workers
            .start(
                RESYNC_WORKER,
                self.config.store.resync_interval,
                cycle(move || {
                    let coordinator = Arc::clone(&coordinator);
                    async move {
                        coordinator.resync().await?;
                        Ok(())
                    }
                }),
            )
            .await;
    }

    /// Stop every worker and flush pending node records.
    pub async fn shutdown(&self) {
        self.workers.stop_all().await;
        if let Err(e) = self.coordinator.persist_dirty().await {
            warn!(kind = K::NAME, error = %e, "final persist failed");
        }
        info!(kind = K::NAME, "grid service stopped");
    }

    // ── Upstream operations ────────────────────────────────────────

    /// The node that owns `key`, assigning it if needed.
    pub async fn get_worker_for_instrument(&self, key: &str) -> CoordinatorResult<NodeId> {
        self.coordinator.assign(key, None).await
    }

    pub async fn should_handle(&self, key: &str, self_node_id: &str) -> CoordinatorResult<bool> {
        self.coordinator.should_handle(key, self_node_id).await
    }

    pub async fn register_node(&self, node_id: &str, capacity: u32) -> CoordinatorResult<bool> {
        self.coordinator.register_node(node_id, capacity).await
    }

    /// Gracefully remove a node and forget its backpressure samples.
    pub async fn unregister_node(&self, node_id: &str) -> CoordinatorResult<Evacuation> {
        let evacuation = self.coordinator.unregister_node(node_id).await?;
        self.monitor.remove_pod(node_id);
        Ok(evacuation)
    }

    pub fn heartbeat(&self, node_id: &str, hb: Heartbeat) -> CoordinatorResult<()> {
        self.coordinator.heartbeat(node_id, hb)
    }

    /// Heartbeat `node_id` with the usage from its latest metrics sample.
    ///
    /// A node that has reported no metrics heartbeats as idle.
    pub fn heartbeat_from_metrics(&self, node_id: &str) -> CoordinatorResult<()> {
        let hb = self
            .monitor
            .latest_sample(node_id)
            .map(|s| Heartbeat {
                cpu_usage: s.cpu_usage,
                memory_usage: s.memory_usage,
                computation_rate: 0.0,
            })
            .unwrap_or_default();
        self.coordinator.heartbeat(node_id, hb)
    }

    /// Record a metrics sample and return the new cluster level.
    pub fn report_metrics(
        &self,
        node_id: &str,
        sample: MetricsSample,
    ) -> CoordinatorResult<BackpressureLevel> {
        Ok(self.monitor.update_metrics(node_id, sample)?)
    }

    /// Record a JSON metrics payload; missing or mistyped fields reject it.
    pub fn report_metrics_json(
        &self,
        node_id: &str,
        payload: &str,
    ) -> CoordinatorResult<BackpressureLevel> {
        Ok(self.monitor.ingest_json(node_id, payload)?)
    }

    pub fn get_scaling_recommendation(&self, current_replicas: u32) -> ScalingRecommendation {
        self.monitor.recommendation(current_replicas)
    }

    /// Remove failed nodes and forget their backpressure samples.
    pub async fn health_sweep(&self) -> SweepReport {
        let report = self.coordinator.health_sweep().await;
        for node_id in &report.failed {
            self.monitor.remove_pod(node_id);
        }
        report
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        self.coordinator.cluster_status()
    }
}

/// Box a worker cycle.
fn cycle<F, Fut>(f: F) -> CycleFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalgrid_backpressure::{ScalingAction, Urgency};
    use signalgrid_state::StateStore;

    fn service() -> GridService {
        GridService::new(
            Some(Arc::new(StateStore::open_in_memory().unwrap())),
            GridConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn missing_store_is_fatal() {
        let result = GridService::<PodKind>::new(None, GridConfig::default());
        assert!(matches!(
            result.err(),
            Some(crate::CoordinatorError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn critical_metrics_bypass_cooldown() {
        let svc = service();
        svc.register_node("A", 100).await.unwrap();

        // A quiet answer first.
        let quiet = svc.get_scaling_recommendation(2);
        assert_eq!(quiet.action, ScalingAction::None);

        let level = svc
            .report_metrics(
                "A",
                MetricsSample {
                    queue_depth: 2500.0,
                    p99_latency_ms: 100.0,
                    cpu_usage: 0.96,
                    memory_usage: 0.96,
                    error_rate: 0.3,
                },
            )
            .unwrap();
        assert_eq!(level, BackpressureLevel::Critical);

        let rec = svc.get_scaling_recommendation(2);
        assert_eq!(rec.action, ScalingAction::ScaleUp);
        assert_eq!(rec.urgency, Urgency::Critical);
        assert!(rec.recommended_pods >= 4);
    }

    #[tokio::test]
    async fn incomplete_payload_is_rejected() {
        let svc = service();
        let result = svc.report_metrics_json(
            "A",
            r#"{"queue_depth":10,"p99_latency_ms":5,"cpu_usage":0.2,"memory_usage":0.2}"#,
        );
        assert!(matches!(result, Err(crate::CoordinatorError::Validation(_))));
        assert_eq!(svc.monitor().history_len(), 0);
    }

    #[tokio::test]
    async fn unregistered_pod_no_longer_pins_level() {
        let svc = service();
        svc.register_node("A", 100).await.unwrap();
        svc.register_node("B", 100).await.unwrap();
        svc.report_metrics(
            "B",
            MetricsSample {
                queue_depth: 3000.0,
                p99_latency_ms: 900.0,
                cpu_usage: 0.99,
                memory_usage: 0.5,
                error_rate: 0.0,
            },
        )
        .unwrap();
        svc.report_metrics(
            "A",
            MetricsSample {
                queue_depth: 10.0,
                p99_latency_ms: 20.0,
                cpu_usage: 0.1,
                memory_usage: 0.1,
                error_rate: 0.0,
            },
        )
        .unwrap();
        assert_eq!(svc.monitor().level(), BackpressureLevel::Critical);

        svc.unregister_node("B").await.unwrap();
        assert_eq!(svc.monitor().level(), BackpressureLevel::Low);
    }

    #[tokio::test]
    async fn reported_usage_drives_overload() {
        let svc = service();
        svc.register_node("A", 100).await.unwrap();
        svc.heartbeat_from_metrics("A").unwrap();
        assert!(svc.coordinator().registry().is_ready("A"));

        svc.report_metrics(
            "A",
            MetricsSample {
                queue_depth: 100.0,
                p99_latency_ms: 50.0,
                cpu_usage: 0.93,
                memory_usage: 0.4,
                error_rate: 0.0,
            },
        )
        .unwrap();
        svc.heartbeat_from_metrics("A").unwrap();
        let node = svc.coordinator().registry().get("A").unwrap();
        assert_eq!(node.cpu_usage, 0.93);
        assert!(!svc.coordinator().registry().is_ready("A"));
    }

    #[tokio::test]
    async fn workers_start_and_stop() {
        let svc = Arc::new(service());
        svc.init().await.unwrap();
        svc.start_workers().await;
        assert_eq!(
            svc.workers().active().await,
            [PERSIST_WORKER, REBALANCE_WORKER, RESYNC_WORKER, SWEEP_WORKER]
        );
        svc.shutdown().await;
        assert!(svc.workers().active().await.is_empty());
    }
}

//! Scaling engine — turns recommendations into replica changes.
//!
//! Keeps its own cooldown separate from the monitor's, clamps every target
//! to `[min_replicas, max_replicas]`, and on scale-down always drains the
//! surplus replicas before asking the orchestrator to remove them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use signalgrid_backpressure::{BackpressureMonitor, ScalingAction, ScalingRecommendation, Urgency};
use signalgrid_core::{ScalingConfig, epoch_millis};

/// Callback type for orchestrator actions.
///
/// The scale callback receives the target replica count; the drain
/// callback receives the number of replicas to drain.
pub type ScaleCallback = Box<dyn Fn(u32) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

/// Result of applying one recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleOutcome {
    pub scaled: bool,
    pub new_replica_count: u32,
    pub direction: ScaleDirection,
}

impl ScaleOutcome {
    fn unchanged(current: u32) -> Self {
        Self {
            scaled: false,
            new_replica_count: current,
            direction: ScaleDirection::None,
        }
    }
}

/// Applies scaling recommendations to a replica set.
pub struct ScalingEngine {
    min_replicas: u32,
    max_replicas: u32,
    cooldown: Duration,
    /// Epoch millis of the last applied change.
    last_scaled_at: Option<u64>,
    scale_fn: Option<ScaleCallback>,
    drain_fn: Option<ScaleCallback>,
}

impl ScalingEngine {
    pub fn new(config: &ScalingConfig) -> Self {
        Self {
            min_replicas: config.min_replicas,
            max_replicas: config.max_replicas.max(config.min_replicas),
            cooldown: config.cooldown,
            last_scaled_at: None,
            scale_fn: None,
            drain_fn: None,
        }
    }

    /// Set the callback that sets the replica count.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Set the callback that drains replicas ahead of a scale-down.
    pub fn with_drain_fn(mut self, f: ScaleCallback) -> Self {
        self.drain_fn = Some(f);
        self
    }

    /// Decide without acting.
    pub fn plan(
        &self,
        rec: &ScalingRecommendation,
        current_replicas: u32,
        now_ms: u64,
    ) -> ScaleOutcome {
        if rec.action == ScalingAction::None {
            return ScaleOutcome::unchanged(current_replicas);
        }

        if rec.urgency != Urgency::Critical
            && let Some(last) = self.last_scaled_at
            && now_ms.saturating_sub(last) < self.cooldown.as_millis() as u64
        {
            debug!(
                action = ?rec.action,
                since_last_ms = now_ms.saturating_sub(last),
                "scaling suppressed by cooldown"
            );
            return ScaleOutcome::unchanged(current_replicas);
        }

        let target = rec
            .recommended_pods
            .clamp(self.min_replicas, self.max_replicas);
        let direction = match (rec.action, target.cmp(&current_replicas)) {
            (ScalingAction::ScaleUp, std::cmp::Ordering::Greater) => ScaleDirection::Up,
            (ScalingAction::ScaleDown, std::cmp::Ordering::Less) => ScaleDirection::Down,
            (_, std::cmp::Ordering::Equal) => return ScaleOutcome::unchanged(current_replicas),
            _ => {
                warn!(
                    action = ?rec.action,
                    current_replicas,
                    target,
                    "recommendation points the other way, ignoring"
                );
                return ScaleOutcome::unchanged(current_replicas);
            }
        };

        ScaleOutcome {
            scaled: true,
            new_replica_count: target,
            direction,
        }
    }

    /// Apply a recommendation now.
    pub async fn apply(
        &mut self,
        rec: &ScalingRecommendation,
        current_replicas: u32,
    ) -> anyhow::Result<ScaleOutcome> {
        self.apply_at(rec, current_replicas, epoch_millis()).await
    }

    /// Apply a recommendation at `now_ms`.
    ///
    /// Without callbacks the engine only decides. A scale-down with a scale
    /// callback but no drain callback is refused.
    pub async fn apply_at(
        &mut self,
        rec: &ScalingRecommendation,
        current_replicas: u32,
        now_ms: u64,
    ) -> anyhow::Result<ScaleOutcome> {
        let outcome = self.plan(rec, current_replicas, now_ms);
        if !outcome.scaled {
            return Ok(outcome);
        }
        let target = outcome.new_replica_count;

        if outcome.direction == ScaleDirection::Down {
            let surplus = current_replicas - target;
            match (&self.drain_fn, &self.scale_fn) {
                (Some(drain), _) => {
                    info!(surplus, "draining replicas before scale-down");
                    drain(surplus).await?;
                }
                (None, Some(_)) => {
                    anyhow::bail!("scale-down to {target} refused: no drain callback configured");
                }
                (None, None) => {}
            }
        }

        if let Some(scale) = &self.scale_fn {
            scale(target).await?;
        }

        self.last_scaled_at = Some(now_ms);
        info!(
            from = current_replicas,
            to = target,
            direction = ?outcome.direction,
            urgency = ?rec.urgency,
            reason = %rec.reason,
            "replicas scaled"
        );
        Ok(outcome)
    }

    /// Poll the monitor and apply its recommendations until shutdown.
    pub async fn run(
        &mut self,
        monitor: Arc<BackpressureMonitor>,
        initial_replicas: u32,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "scaling engine started");
        let mut replicas = initial_replicas;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let rec = monitor.recommendation(replicas);
                    match self.apply(&rec, replicas).await {
                        Ok(outcome) => replicas = outcome.new_replica_count,
                        Err(e) => warn!(error = %e, "scaling action failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use signalgrid_backpressure::BackpressureLevel;

    fn rec(action: ScalingAction, urgency: Urgency, current: u32, recommended: u32) -> ScalingRecommendation {
        ScalingRecommendation {
            action,
            urgency,
            current_pods: current,
            recommended_pods: recommended,
            reason: "test".to_string(),
            confidence: 0.7,
            level: BackpressureLevel::High,
            load_score: 0.8,
            created_at_ms: 0,
        }
    }

    fn engine() -> ScalingEngine {
        ScalingEngine::new(&ScalingConfig {
            min_replicas: 1,
            max_replicas: 6,
            cooldown: Duration::from_secs(120),
        })
    }

    /// Records every callback invocation as `(kind, value)`.
    fn recording_engine(calls: Arc<Mutex<Vec<(&'static str, u32)>>>) -> ScalingEngine {
        let drain_calls = Arc::clone(&calls);
        let scale_calls = calls;
        engine()
            .with_drain_fn(Box::new(move |n| {
                drain_calls.lock().unwrap().push(("drain", n));
                Box::pin(async { Ok(()) })
            }))
            .with_scale_fn(Box::new(move |n| {
                scale_calls.lock().unwrap().push(("scale", n));
                Box::pin(async { Ok(()) })
            }))
    }

    #[tokio::test]
    async fn none_action_never_scales() {
        let mut e = engine();
        let out = e
            .apply_at(&rec(ScalingAction::None, Urgency::None, 3, 3), 3, 0)
            .await
            .unwrap();
        assert_eq!(out, ScaleOutcome::unchanged(3));
    }

    #[tokio::test]
    async fn scale_up_is_clamped_to_max() {
        let mut e = engine();
        let out = e
            .apply_at(&rec(ScalingAction::ScaleUp, Urgency::High, 5, 9), 5, 0)
            .await
            .unwrap();
        assert!(out.scaled);
        assert_eq!(out.new_replica_count, 6);
        assert_eq!(out.direction, ScaleDirection::Up);
    }

    #[tokio::test]
    async fn cooldown_blocks_non_critical() {
        let mut e = engine();
        e.apply_at(&rec(ScalingAction::ScaleUp, Urgency::High, 2, 3), 2, 0)
            .await
            .unwrap();

        let out = e
            .apply_at(&rec(ScalingAction::ScaleUp, Urgency::High, 3, 4), 3, 60_000)
            .await
            .unwrap();
        assert!(!out.scaled);
        assert_eq!(out.new_replica_count, 3);

        let out = e
            .apply_at(&rec(ScalingAction::ScaleUp, Urgency::Critical, 3, 5), 3, 60_000)
            .await
            .unwrap();
        assert!(out.scaled);
        assert_eq!(out.new_replica_count, 5);

        let out = e
            .apply_at(&rec(ScalingAction::ScaleUp, Urgency::High, 5, 6), 5, 60_000 + 120_000)
            .await
            .unwrap();
        assert!(out.scaled);
    }

    #[tokio::test]
    async fn scale_down_drains_first() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut e = recording_engine(Arc::clone(&calls));

        let out = e
            .apply_at(&rec(ScalingAction::ScaleDown, Urgency::Low, 4, 3), 4, 0)
            .await
            .unwrap();
        assert_eq!(out.direction, ScaleDirection::Down);
        assert_eq!(out.new_replica_count, 3);
        assert_eq!(*calls.lock().unwrap(), vec![("drain", 1), ("scale", 3)]);
    }

    #[tokio::test]
    async fn scale_up_does_not_drain() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut e = recording_engine(Arc::clone(&calls));
        e.apply_at(&rec(ScalingAction::ScaleUp, Urgency::High, 2, 4), 2, 0)
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![("scale", 4)]);
    }

    async fn drain_timeout() -> anyhow::Result<()> {
        anyhow::bail!("drain timed out")
    }

    #[tokio::test]
    async fn failed_drain_aborts_scale_down() {
        let scaled = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&scaled);
        let mut e = engine()
            .with_drain_fn(Box::new(|_| Box::pin(drain_timeout())))
            .with_scale_fn(Box::new(move |_| {
                *flag.lock().unwrap() = true;
                Box::pin(async { Ok(()) })
            }));

        let err = e
            .apply_at(&rec(ScalingAction::ScaleDown, Urgency::Low, 3, 2), 3, 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("drain timed out"));
        assert!(!*scaled.lock().unwrap());

        // A failed attempt does not start the cooldown.
        let out = e.plan(&rec(ScalingAction::ScaleUp, Urgency::High, 3, 4), 3, 1);
        assert!(out.scaled);
    }

    #[tokio::test]
    async fn scale_down_without_drain_is_refused() {
        let mut e = engine().with_scale_fn(Box::new(|_| Box::pin(async { Ok(()) })));
        let result = e
            .apply_at(&rec(ScalingAction::ScaleDown, Urgency::Low, 3, 2), 3, 0)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn scale_up_never_removes_replicas() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut e = ScalingEngine {
            max_replicas: 20,
            ..recording_engine(Arc::clone(&calls))
        };
        let outcome = e
            .apply_at(&rec(ScalingAction::ScaleUp, Urgency::Critical, 12, 10), 12, 0)
            .await
            .unwrap();
        assert_eq!(outcome, ScaleOutcome::unchanged(12));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn scale_down_respects_min() {
        let e = engine();
        let out = e.plan(&rec(ScalingAction::ScaleDown, Urgency::Low, 1, 0), 1, 0);
        assert!(!out.scaled);
        assert_eq!(out.new_replica_count, 1);
    }

    #[tokio::test]
    async fn run_loop_applies_monitor_recommendations() {
        use signalgrid_backpressure::MetricsSample;

        let monitor = Arc::new(BackpressureMonitor::default());
        monitor
            .update_metrics(
                "pod-a",
                MetricsSample {
                    queue_depth: 2500.0,
                    p99_latency_ms: 100.0,
                    cpu_usage: 0.96,
                    memory_usage: 0.96,
                    error_rate: 0.3,
                },
            )
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut e = recording_engine(Arc::clone(&calls));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(async move {
            e.run(monitor, 2, Duration::from_millis(10), rx).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.first(), Some(&("scale", 4)));
    }
}

//! Backpressure monitor — aggregates pod metrics into a cluster view.
//!
//! Keeps a bounded FIFO of recent samples across all pods (for the trend)
//! plus the latest sample per pod (for the level and load score), and
//! caches the last scaling recommendation for the cooldown window.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use signalgrid_core::{BackpressureConfig, NodeId, epoch_millis};

use crate::error::ValidationError;
use crate::level::{BackpressureLevel, LevelThresholds, classify, load_score};
use crate::recommendation::{ScalingRecommendation, decide};
use crate::sample::{MetricsReport, MetricsSample};
use crate::trend::{TrendAnalysis, analyze};

/// A sample as stored in the history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedSample {
    pub timestamp_ms: u64,
    pub sample: MetricsSample,
}

#[derive(Debug)]
struct MonitorState {
    history: VecDeque<RecordedSample>,
    latest: BTreeMap<NodeId, RecordedSample>,
    level: BackpressureLevel,
    last_recommendation: Option<ScalingRecommendation>,
}

/// Cluster backpressure monitor.
#[derive(Debug)]
pub struct BackpressureMonitor {
    thresholds: LevelThresholds,
    history_size: usize,
    cooldown: Duration,
    state: Mutex<MonitorState>,
}

impl BackpressureMonitor {
    pub fn new(config: &BackpressureConfig) -> Self {
        Self {
            thresholds: LevelThresholds::from(config),
            history_size: config.history_size.max(1),
            cooldown: config.cooldown,
            state: Mutex::new(MonitorState {
                history: VecDeque::with_capacity(config.history_size),
                latest: BTreeMap::new(),
                level: BackpressureLevel::Low,
                last_recommendation: None,
            }),
        }
    }

    /// Override the recommendation cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Ingestion ──────────────────────────────────────────────────

    /// Accept a sample from `pod_id` and return the new cluster level.
    ///
    /// An out-of-range sample is rejected without touching any state.
    pub fn update_metrics(
        &self,
        pod_id: &str,
        sample: MetricsSample,
    ) -> Result<BackpressureLevel, ValidationError> {
        self.update_metrics_at(pod_id, sample, epoch_millis())
    }

    pub fn update_metrics_at(
        &self,
        pod_id: &str,
        sample: MetricsSample,
        now_ms: u64,
    ) -> Result<BackpressureLevel, ValidationError> {
        if let Err(e) = sample.validate() {
            warn!(%pod_id, error = %e, "metrics sample rejected");
            return Err(e);
        }

        let recorded = RecordedSample {
            timestamp_ms: now_ms,
            sample,
        };

        let mut state = self.lock();
        if state.history.len() == self.history_size {
            state.history.pop_front();
        }
        state.history.push_back(recorded);
        state.latest.insert(pod_id.to_string(), recorded);

        let previous = state.level;
        state.level = self.cluster_level(&state);
        if state.level != previous {
            info!(%pod_id, from = ?previous, to = ?state.level, "backpressure level changed");
        } else {
            debug!(%pod_id, level = ?state.level, "metrics recorded");
        }
        Ok(state.level)
    }

    /// Accept a loosely-typed report; any missing metric rejects it.
    pub fn update_report(
        &self,
        pod_id: &str,
        report: MetricsReport,
    ) -> Result<BackpressureLevel, ValidationError> {
        let sample = MetricsSample::try_from(report).inspect_err(|e| {
            warn!(%pod_id, error = %e, "metrics report rejected");
        })?;
        self.update_metrics(pod_id, sample)
    }

    /// Accept a JSON payload; any missing or mistyped metric rejects it.
    pub fn ingest_json(
        &self,
        pod_id: &str,
        payload: &str,
    ) -> Result<BackpressureLevel, ValidationError> {
        let sample = MetricsSample::from_json(payload).inspect_err(|e| {
            warn!(%pod_id, error = %e, "metrics payload rejected");
        })?;
        self.update_metrics(pod_id, sample)
    }

    /// Forget a pod's latest sample (e.g. after it left the cluster).
    pub fn remove_pod(&self, pod_id: &str) -> bool {
        let mut state = self.lock();
        let removed = state.latest.remove(pod_id).is_some();
        if removed {
            state.level = self.cluster_level(&state);
            debug!(%pod_id, level = ?state.level, "pod metrics dropped");
        }
        removed
    }

    fn cluster_level(&self, state: &MonitorState) -> BackpressureLevel {
        state
            .latest
            .values()
            .map(|r| classify(&r.sample, &self.thresholds))
            .max()
            .unwrap_or(BackpressureLevel::Low)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn level(&self) -> BackpressureLevel {
        self.lock().level
    }

    pub fn pod_level(&self, pod_id: &str) -> Option<BackpressureLevel> {
        self.lock()
            .latest
            .get(pod_id)
            .map(|r| classify(&r.sample, &self.thresholds))
    }

    /// The most recent accepted sample from `pod_id`.
    pub fn latest_sample(&self, pod_id: &str) -> Option<MetricsSample> {
        self.lock().latest.get(pod_id).map(|r| r.sample)
    }

    /// Mean load score over each pod's latest sample (0 with no pods).
    pub fn load_score(&self) -> f64 {
        let state = self.lock();
        self.mean_load_score(&state)
    }

    fn mean_load_score(&self, state: &MonitorState) -> f64 {
        if state.latest.is_empty() {
            return 0.0;
        }
        let total: f64 = state
            .latest
            .values()
            .map(|r| load_score(&r.sample, &self.thresholds))
            .sum();
        total / state.latest.len() as f64
    }

    /// Trend over the most recent samples; `None` until five are recorded.
    pub fn trend_analysis(&self) -> Option<TrendAnalysis> {
        let state = self.lock();
        Self::trend_of(&state)
    }

    fn trend_of(state: &MonitorState) -> Option<TrendAnalysis> {
        let samples: Vec<MetricsSample> = state.history.iter().map(|r| r.sample).collect();
        analyze(&samples)
    }

    pub fn history(&self) -> Vec<RecordedSample> {
        self.lock().history.iter().copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    // ── Recommendations ────────────────────────────────────────────

    /// Scaling recommendation for a cluster currently running `current_pods`.
    ///
    /// Within the cooldown of an actionable recommendation the cached one is
    /// returned unchanged, unless the level is CRITICAL. A `none` answer
    /// never holds the cooldown.
    pub fn recommendation(&self, current_pods: u32) -> ScalingRecommendation {
        self.recommendation_at(current_pods, epoch_millis())
    }

    pub fn recommendation_at(&self, current_pods: u32, now_ms: u64) -> ScalingRecommendation {
        let mut state = self.lock();
        let cooldown_ms = self.cooldown.as_millis() as u64;

        if state.level != BackpressureLevel::Critical
            && let Some(last) = &state.last_recommendation
            && last.is_actionable()
            && now_ms.saturating_sub(last.created_at_ms) < cooldown_ms
        {
            debug!(action = ?last.action, "returning cached recommendation");
            return last.clone();
        }

        let trend = Self::trend_of(&state);
        let rec = decide(
            state.level,
            self.mean_load_score(&state),
            trend.as_ref(),
            current_pods,
            now_ms,
        );
        if rec.is_actionable() {
            info!(
                action = ?rec.action,
                urgency = ?rec.urgency,
                from = current_pods,
                to = rec.recommended_pods,
                reason = %rec.reason,
                "scaling recommended"
            );
        }
        state.last_recommendation = Some(rec.clone());
        rec
    }

    /// Drop all samples and the cached recommendation.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.latest.clear();
        state.level = BackpressureLevel::Low;
        state.last_recommendation = None;
    }
}

impl Default for BackpressureMonitor {
    fn default() -> Self {
        Self::new(&BackpressureConfig::default())
    }
}

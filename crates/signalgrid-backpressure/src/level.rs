//! Backpressure levels and load scoring.

use serde::{Deserialize, Serialize};

use signalgrid_core::BackpressureConfig;

use crate::sample::MetricsSample;

/// Coarse cluster severity. Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackpressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Thresholds the level rules compare against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelThresholds {
    pub critical_queue_depth: f64,
    pub high_queue_depth: f64,
    pub latency_threshold_ms: f64,
    pub error_threshold: f64,
}

impl From<&BackpressureConfig> for LevelThresholds {
    fn from(c: &BackpressureConfig) -> Self {
        Self {
            critical_queue_depth: c.critical_queue_depth,
            high_queue_depth: c.high_queue_depth,
            latency_threshold_ms: c.latency_threshold_ms,
            error_threshold: c.error_threshold,
        }
    }
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self::from(&BackpressureConfig::default())
    }
}

/// Classify one sample. Every rule is a strict `>` on a single metric, so
/// raising any metric can only keep or raise the level.
pub fn classify(s: &MetricsSample, t: &LevelThresholds) -> BackpressureLevel {
    if s.queue_depth > t.critical_queue_depth
        || s.error_rate > 2.0 * t.error_threshold
        || s.cpu_usage > 0.95
        || s.memory_usage > 0.95
    {
        BackpressureLevel::Critical
    } else if s.queue_depth > t.high_queue_depth
        || s.p99_latency_ms > t.latency_threshold_ms
        || s.cpu_usage > 0.8
        || s.memory_usage > 0.85
        || s.error_rate > t.error_threshold
    {
        BackpressureLevel::High
    } else if s.queue_depth > 0.5 * t.high_queue_depth
        || s.cpu_usage > 0.6
        || s.memory_usage > 0.7
    {
        BackpressureLevel::Medium
    } else {
        BackpressureLevel::Low
    }
}

/// Weighted load in [0, 1]: queue 40%, cpu 25%, memory 25%, errors 10%.
pub fn load_score(s: &MetricsSample, t: &LevelThresholds) -> f64 {
    let queue = (s.queue_depth / t.high_queue_depth).min(1.0);
    let errors = (s.error_rate / t.error_threshold).min(1.0);
    let score = 0.4 * queue + 0.25 * s.cpu_usage + 0.25 * s.memory_usage + 0.1 * errors;
    score.clamp(0.0, 1.0)
}

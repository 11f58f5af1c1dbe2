//! signalgrid-backpressure — turns live worker metrics into a cluster
//! backpressure level, a load trend, and a scaling recommendation.
//!
//! # Level rules (first match wins)
//!
//! ```text
//! CRITICAL  queue > critical | errors > 2 x error_threshold | cpu > 0.95 | mem > 0.95
//! HIGH      queue > high | p99 > latency_threshold | cpu > 0.8 | mem > 0.85 | errors > error_threshold
//! MEDIUM    queue > high / 2 | cpu > 0.6 | mem > 0.7
//! LOW       otherwise
//! ```
//!
//! The cluster level is the highest level among each pod's latest sample.
//! Samples missing any metric are rejected before they touch any state.

pub mod error;
pub mod level;
pub mod monitor;
pub mod recommendation;
pub mod sample;
pub mod trend;

pub use error::ValidationError;
pub use level::{BackpressureLevel, LevelThresholds, classify, load_score};
pub use monitor::{BackpressureMonitor, RecordedSample};
pub use recommendation::{ScalingAction, ScalingRecommendation, Urgency, MAX_PODS, MIN_PODS};
pub use sample::{MetricsReport, MetricsSample};
pub use trend::{Trend, TrendAnalysis, analyze, slope};

//! Metrics samples as reported by worker pods.
//!
//! `MetricsSample` deserializes strictly: every metric is required and has
//! no serde default, so a payload missing a field fails to parse instead of
//! turning into a zero. `MetricsReport` is the loose shape for callers that
//! assemble metrics field by field; converting it names the missing field.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One validated set of pod metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Pending signal computations.
    pub queue_depth: f64,
    pub p99_latency_ms: f64,
    /// Fraction in [0, 1].
    pub cpu_usage: f64,
    /// Fraction in [0, 1].
    pub memory_usage: f64,
    /// Fraction in [0, 1].
    pub error_rate: f64,
}

impl MetricsSample {
    /// Parse a JSON payload, failing on any missing or mistyped field.
    pub fn from_json(payload: &str) -> Result<Self, ValidationError> {
        let sample: MetricsSample = serde_json::from_str(payload)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        sample.validate()?;
        Ok(sample)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        non_negative("queue_depth", self.queue_depth)?;
        non_negative("p99_latency_ms", self.p99_latency_ms)?;
        fraction("cpu_usage", self.cpu_usage)?;
        fraction("memory_usage", self.memory_usage)?;
        fraction("error_rate", self.error_rate)?;
        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

fn fraction(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

/// Loosely-typed metrics as collected from a pod, before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub queue_depth: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub error_rate: Option<f64>,
}

impl TryFrom<MetricsReport> for MetricsSample {
    type Error = ValidationError;

    fn try_from(r: MetricsReport) -> Result<Self, Self::Error> {
        let sample = MetricsSample {
            queue_depth: r
                .queue_depth
                .ok_or(ValidationError::MissingField("queue_depth"))?,
            p99_latency_ms: r
                .p99_latency_ms
                .ok_or(ValidationError::MissingField("p99_latency_ms"))?,
            cpu_usage: r
                .cpu_usage
                .ok_or(ValidationError::MissingField("cpu_usage"))?,
            memory_usage: r
                .memory_usage
                .ok_or(ValidationError::MissingField("memory_usage"))?,
            error_rate: r
                .error_rate
                .ok_or(ValidationError::MissingField("error_rate"))?,
        };
        sample.validate()?;
        Ok(sample)
    }
}

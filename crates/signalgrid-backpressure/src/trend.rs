//! Load trend over the most recent samples.
//!
//! A least-squares slope per metric, compared against fixed per-sample
//! thresholds. The confidence attached to the result is one of three fixed
//! values (0.6 stable, 0.7 one signal, 0.8 two or more signals); it is a
//! heuristic weight, not a statistical interval.

use serde::{Deserialize, Serialize};

use crate::sample::MetricsSample;

/// Samples the trend window needs.
pub const TREND_WINDOW: usize = 5;

/// Queue growth per sample that counts as a signal.
const QUEUE_SLOPE: f64 = 10.0;
const CPU_SLOPE: f64 = 0.02;
const ERROR_SLOPE: f64 = 0.005;

const CONFIDENCE_STABLE: f64 = 0.6;
const CONFIDENCE_ONE_SIGNAL: f64 = 0.7;
const CONFIDENCE_MULTI_SIGNAL: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub trend: Trend,
    pub confidence: f64,
    pub queue_slope: f64,
    pub cpu_slope: f64,
    pub error_slope: f64,
}

/// Least-squares slope of `ys` against `x = 0, 1, 2, ...`.
pub fn slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    if ys.len() < 2 {
        return 0.0;
    }
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in ys.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += y;
        sxy += x * y;
        sxx += x * x;
    }
    let denom = n * sxx - sx * sx;
    if denom == 0.0 {
        0.0
    } else {
        (n * sxy - sx * sy) / denom
    }
}

/// Analyze the last `TREND_WINDOW` samples (oldest first).
///
/// Returns `None` when fewer samples are available.
pub fn analyze(samples: &[MetricsSample]) -> Option<TrendAnalysis> {
    if samples.len() < TREND_WINDOW {
        return None;
    }
    let window = &samples[samples.len() - TREND_WINDOW..];
    let series = |f: fn(&MetricsSample) -> f64| window.iter().map(f).collect::<Vec<_>>();

    let queue_slope = slope(&series(|s| s.queue_depth));
    let cpu_slope = slope(&series(|s| s.cpu_usage));
    let error_slope = slope(&series(|s| s.error_rate));

    let signals = [
        (queue_slope, QUEUE_SLOPE),
        (cpu_slope, CPU_SLOPE),
        (error_slope, ERROR_SLOPE),
    ];
    let rising = signals.iter().filter(|(s, t)| *s > *t).count();
    let falling = signals.iter().filter(|(s, t)| *s < -*t).count();

    let (trend, strength) = if rising > falling {
        (Trend::Increasing, rising)
    } else if falling > rising {
        (Trend::Decreasing, falling)
    } else {
        (Trend::Stable, 0)
    };
    let confidence = match strength {
        0 => CONFIDENCE_STABLE,
        1 => CONFIDENCE_ONE_SIGNAL,
        _ => CONFIDENCE_MULTI_SIGNAL,
    };

    Some(TrendAnalysis {
        trend,
        confidence,
        queue_slope,
        cpu_slope,
        error_slope,
    })
}

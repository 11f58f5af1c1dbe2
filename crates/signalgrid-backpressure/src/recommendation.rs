//! Scaling recommendations derived from level, load score and trend.

use serde::{Deserialize, Serialize};

use crate::level::BackpressureLevel;
use crate::trend::{Trend, TrendAnalysis};

/// Recommended pod counts are clamped to this range.
pub const MIN_PODS: u32 = 1;
pub const MAX_PODS: u32 = 10;

/// Confidence attached when the level alone forces a scale-up.
const CRITICAL_CONFIDENCE: f64 = 0.9;
/// Confidence used when there is not yet enough history for a trend.
const NO_TREND_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    None,
    ScaleUp,
    ScaleDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRecommendation {
    pub action: ScalingAction,
    pub urgency: Urgency,
    pub current_pods: u32,
    /// Always within `[MIN_PODS, MAX_PODS]`.
    pub recommended_pods: u32,
    pub reason: String,
    pub confidence: f64,
    pub level: BackpressureLevel,
    pub load_score: f64,
    /// Epoch milliseconds when this recommendation was made.
    pub created_at_ms: u64,
}

impl ScalingRecommendation {
    pub fn is_actionable(&self) -> bool {
        self.action != ScalingAction::None
    }
}

/// The decision table.
///
/// ```text
/// level CRITICAL                                  -> scale_up +2, critical
/// score > 0.7                                     -> scale_up +1 (+2 above 0.85), high
/// score > 0.5 and trend increasing                -> scale_up +1, medium
/// score < 0.3, trend decreasing, LOW, pods > 1    -> scale_down -1, low
/// otherwise                                       -> none
/// ```
pub fn decide(
    level: BackpressureLevel,
    load_score: f64,
    trend: Option<&TrendAnalysis>,
    current_pods: u32,
    now_ms: u64,
) -> ScalingRecommendation {
    let trend_kind = trend.map(|t| t.trend);
    let trend_confidence = trend.map_or(NO_TREND_CONFIDENCE, |t| t.confidence);

    let (action, urgency, delta, confidence, reason): (_, _, i64, _, String) =
        if level == BackpressureLevel::Critical {
            (
                ScalingAction::ScaleUp,
                Urgency::Critical,
                2,
                CRITICAL_CONFIDENCE,
                "critical backpressure".to_string(),
            )
        } else if load_score > 0.7 {
            let step = if load_score > 0.85 { 2 } else { 1 };
            (
                ScalingAction::ScaleUp,
                Urgency::High,
                step,
                trend_confidence,
                format!("load score {load_score:.2} above 0.70"),
            )
        } else if load_score > 0.5 && trend_kind == Some(Trend::Increasing) {
            (
                ScalingAction::ScaleUp,
                Urgency::Medium,
                1,
                trend_confidence,
                format!("load score {load_score:.2} and rising"),
            )
        } else if load_score < 0.3
            && trend_kind == Some(Trend::Decreasing)
            && level == BackpressureLevel::Low
            && current_pods > 1
        {
            (
                ScalingAction::ScaleDown,
                Urgency::Low,
                -1,
                trend_confidence,
                format!("load score {load_score:.2} and falling"),
            )
        } else {
            (
                ScalingAction::None,
                Urgency::None,
                0,
                trend_confidence,
                "load within bounds".to_string(),
            )
        };

    let target = (i64::from(current_pods) + delta).clamp(i64::from(MIN_PODS), i64::from(MAX_PODS));
    let recommended_pods = target as u32;

    // The clamped target must move the way the table asked and by no more
    // than the step; otherwise the pod limits veto the change.
    let moved = i64::from(recommended_pods) - i64::from(current_pods);
    let within_limits = match action {
        ScalingAction::ScaleUp => moved > 0 && moved <= delta,
        ScalingAction::ScaleDown => moved < 0 && moved >= delta,
        ScalingAction::None => true,
    };
    let (action, urgency, reason) = if within_limits {
        (action, urgency, reason)
    } else {
        (
            ScalingAction::None,
            Urgency::None,
            format!("{reason}; outside pod limits"),
        )
    };

    ScalingRecommendation {
        action,
        urgency,
        current_pods,
        recommended_pods,
        reason,
        confidence,
        level,
        load_score,
        created_at_ms: now_ms,
    }
}

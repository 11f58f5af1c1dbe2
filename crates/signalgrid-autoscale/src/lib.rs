//! signalgrid-autoscale — applies scaling recommendations.
//!
//! Takes a `ScalingRecommendation` from the backpressure monitor and the
//! current replica count and decides whether to act:
//!
//! ```text
//! action none                         -> no change
//! within cooldown (unless critical)   -> no change
//! target = clamp(recommended, min, max)
//! target == current                   -> no change
//! target < current                    -> drain(current - target), then scale(target)
//! target > current                    -> scale(target)
//! ```
//!
//! The actual replica lifecycle is external: the engine calls the
//! orchestrator through the `drain` and `scale` callbacks.

pub mod engine;

pub use engine::{ScaleCallback, ScaleDirection, ScaleOutcome, ScalingEngine};

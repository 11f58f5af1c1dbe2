//! Identifiers and resource kinds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a worker node or pod.
pub type NodeId = String;

/// Key of a unit of work, e.g. an instrument symbol like `"AAPL"`.
pub type InstrumentKey = String;

/// A class of resource the coordinator assigns instruments to.
///
/// Each kind gets its own key namespace in the coordination store, so the
/// pod assignment and the per-symbol worker affinity can share one store
/// without seeing each other's state.
pub trait ResourceKind: Send + Sync + 'static {
    /// Short, store-safe name used in key prefixes.
    const NAME: &'static str;

    /// Prefix for every store key owned by this kind.
    fn key_prefix() -> String {
        format!("signalgrid:{}", Self::NAME)
    }
}

/// Compute pods running signal calculations.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodKind;

impl ResourceKind for PodKind {
    const NAME: &'static str = "pod";
}

/// Long-lived worker processes with per-symbol cache affinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerKind;

impl ResourceKind for WorkerKind {
    const NAME: &'static str = "worker";
}

/// Milliseconds since the unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

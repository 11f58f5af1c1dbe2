//! signalgrid-coordinator — decides which node computes which instrument.
//!
//! # Components
//!
//! - **`coordinator`** — `AssignmentCoordinator<K>`: consistent-hash
//!   placement with a load-aware candidate choice, failover on missed
//!   heartbeats, graceful drain, rebalancing, store resync and debounced
//!   write-through
//! - **`rebalance`** — deterministic rebalance planning
//! - **`workers`** — named, supervised background loops
//! - **`service`** — `GridService`, the upstream facade that also owns the
//!   backpressure monitor
//! - **`events`** — `GridEvent`, published on the coordination store
//!
//! # Assignment
//!
//! ```text
//! assign(key, preferred)
//!   owner READY?                    -> owner
//!   candidates = [preferred] | ring.locate(key, 3)
//!   least loaded READY candidate with ratio < 0.9
//!   else least loaded READY node anywhere
//!   else NoAvailableNode
//! ```
//!
//! The coordinator is generic over a `ResourceKind`, so compute pods and
//! per-symbol workers run the same algorithm in separate store namespaces.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod keys;
pub mod rebalance;
pub mod service;
pub mod workers;

pub use coordinator::{
    AssignmentCoordinator, ClusterStatus, CoordinatorBuilder, Evacuation, NodeSummary,
    SweepReport,
};
pub use error::{CoordinatorError, CoordinatorResult};
pub use events::GridEvent;
pub use keys::StoreKeys;
pub use rebalance::{PlannedMove, RebalancePlan};
pub use service::GridService;
pub use workers::{BackgroundWorkers, CycleFn};

//! signalgrid-cluster — the node registry.
//!
//! Tracks every worker node's identity, capacity, assigned instruments and
//! heartbeat-derived health, and keeps the shared `HashRing` in step with
//! registrations.
//!
//! # Node states
//!
//! ```text
//!   READY ──(cpu > 0.9 or mem > 0.9)──▶ OVERLOADED
//!   OVERLOADED ──(cpu < 0.7 and mem < 0.7)──▶ READY
//!   READY / OVERLOADED ──(graceful shutdown)──▶ DRAINING ──▶ removed
//! ```
//!
//! A node whose last heartbeat is older than the heartbeat timeout is
//! reported by `stale_nodes`; the coordinator reassigns its instruments and
//! then calls `remove`.

pub mod node;
pub mod registry;

pub use node::{Heartbeat, Node, NodeStatus};
pub use registry::NodeRegistry;

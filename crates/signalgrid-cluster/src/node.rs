//! Node records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use signalgrid_core::{InstrumentKey, NodeId};

/// Scheduling status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Accepting new assignments.
    Ready,
    /// cpu or memory above the enter threshold; skipped for new work.
    Overloaded,
    /// Graceful shutdown in progress. Terminal.
    Draining,
}

/// A registered worker node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub node_id: NodeId,
    /// Instruments this node is sized for.
    pub capacity: u32,
    /// Always equal to the number of assigned instruments.
    pub current_load: u32,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Signals computed per second, as last reported.
    pub computation_rate: f64,
    /// Epoch milliseconds of the last heartbeat.
    pub last_heartbeat: u64,
    pub status: NodeStatus,
    /// Rebuilt from the assignment map; not persisted with the node.
    #[serde(skip)]
    pub(crate) assigned: BTreeSet<InstrumentKey>,
}

impl Node {
    pub fn new(node_id: &str, capacity: u32, now_ms: u64) -> Self {
        Self {
            node_id: node_id.to_string(),
            capacity,
            current_load: 0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            computation_rate: 0.0,
            last_heartbeat: now_ms,
            status: NodeStatus::Ready,
            assigned: BTreeSet::new(),
        }
    }

    /// `current_load / capacity`; a zero-capacity node counts as full.
    pub fn load_ratio(&self) -> f64 {
        if self.capacity == 0 {
            f64::INFINITY
        } else {
            f64::from(self.current_load) / f64::from(self.capacity)
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }

    /// Assigned instruments in lexicographic order.
    pub fn assigned(&self) -> &BTreeSet<InstrumentKey> {
        &self.assigned
    }

    pub(crate) fn attach(&mut self, instrument: &str) -> bool {
        let added = self.assigned.insert(instrument.to_string());
        self.current_load = self.assigned.len() as u32;
        added
    }

    pub(crate) fn detach(&mut self, instrument: &str) -> bool {
        let removed = self.assigned.remove(instrument);
        self.current_load = self.assigned.len() as u32;
        removed
    }

    pub(crate) fn clear_assignments(&mut self) {
        self.assigned.clear();
        self.current_load = 0;
    }
}

/// Usage figures a node reports with each heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub computation_rate: f64,
}

//! Cluster events published on the coordination store.

use serde::{Deserialize, Serialize};

use signalgrid_core::{InstrumentKey, NodeId};

/// One membership or placement change, tagged by `type` on the wire:
///
/// ```json
/// {"type":"node_failure","node_id":"pod-b","last_heartbeat":1700000000000,"reassigned":81,"unassigned":0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridEvent {
    NodeRegistered {
        node_id: NodeId,
        capacity: u32,
    },
    NodeUnregistered {
        node_id: NodeId,
        reassigned: usize,
        unassigned: usize,
    },
    NodeFailure {
        node_id: NodeId,
        last_heartbeat: u64,
        reassigned: usize,
        unassigned: usize,
    },
    RebalanceMove {
        instrument: InstrumentKey,
        from: NodeId,
        to: NodeId,
    },
}

impl GridEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// The wire name of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            GridEvent::NodeRegistered { .. } => "node_registered",
            GridEvent::NodeUnregistered { .. } => "node_unregistered",
            GridEvent::NodeFailure { .. } => "node_failure",
            GridEvent::RebalanceMove { .. } => "rebalance_move",
        }
    }
}

//! Rebalance planning.
//!
//! Pure functions over a snapshot of READY nodes; the coordinator applies
//! the resulting plan. Nodes are paired most-loaded with least-loaded:
//!
//! ```text
//! sorted by load desc:  n0  n1  n2 | n3  n4  n5
//! pairs:                (n0,n5) (n1,n4) (n2,n3)
//! moves per pair:       min(load(over) - target, room(under))
//! ```
//!
//! Instruments leave an overloaded node in lexicographic order, so the same
//! snapshot always yields the same plan.

use serde::{Deserialize, Serialize};

use signalgrid_cluster::Node;
use signalgrid_core::{InstrumentKey, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub instrument: InstrumentKey,
    pub from: NodeId,
    pub to: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub moves: Vec<PlannedMove>,
    /// Mean load the plan aims for.
    pub target_load: u32,
}

impl RebalancePlan {
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// `(max - min) / max` over the nodes' loads.
///
/// `None` with fewer than two nodes or when every node is idle.
pub fn load_spread(nodes: &[Node]) -> Option<f64> {
    if nodes.len() < 2 {
        return None;
    }
    let max = nodes.iter().map(|n| n.current_load).max()?;
    let min = nodes.iter().map(|n| n.current_load).min()?;
    if max == 0 {
        return None;
    }
    Some(f64::from(max - min) / f64::from(max))
}

/// Whether the spread across `nodes` exceeds `threshold`.
pub fn needs_rebalance(nodes: &[Node], threshold: f64) -> bool {
    load_spread(nodes).is_some_and(|spread| spread > threshold)
}

/// Build a plan of at most `max_moves` moves between `nodes`.
///
/// Every node passed in is a potential target, so callers pass READY nodes
/// only.
pub fn plan(nodes: &[Node], max_moves: usize) -> RebalancePlan {
    let mut sorted: Vec<&Node> = nodes.iter().collect();
    sorted.sort_by(|a, b| {
        b.current_load
            .cmp(&a.current_load)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });

    let n = sorted.len();
    if n < 2 {
        return RebalancePlan::default();
    }
    let total: u64 = sorted.iter().map(|node| u64::from(node.current_load)).sum();
    let target_load = (total / n as u64) as u32;

    let mut moves = Vec::new();
    for i in 0..n / 2 {
        let remaining = max_moves.saturating_sub(moves.len());
        if remaining == 0 {
            break;
        }
        let over = sorted[i];
        let under = sorted[n - 1 - i];

        let excess = over.current_load.saturating_sub(target_load);
        let room = target_load
            .saturating_sub(under.current_load)
            .min(under.capacity.saturating_sub(under.current_load));
        let count = (excess.min(room) as usize).min(remaining);

        moves.extend(over.assigned().iter().take(count).map(|instrument| PlannedMove {
            instrument: instrument.clone(),
            from: over.node_id.clone(),
            to: under.node_id.clone(),
        }));
    }

    RebalancePlan { moves, target_load }
}

//! Coordination-store key layout for one resource kind.
//!
//! ```text
//! signalgrid:{kind}:nodes            hash  node_id    -> Node (JSON)
//! signalgrid:{kind}:assignments      hash  instrument -> node_id
//! signalgrid:{kind}:events           channel (GridEvent JSON)
//! signalgrid:{kind}:rebalance:lock   key with TTL = rebalance cooldown
//! ```

use signalgrid_core::ResourceKind;

#[derive(Debug, Clone)]
pub struct StoreKeys {
    pub nodes: String,
    pub assignments: String,
    pub events: String,
    pub rebalance_lock: String,
}

impl StoreKeys {
    pub fn for_kind<K: ResourceKind>() -> Self {
        let prefix = K::key_prefix();
        Self {
            nodes: format!("{prefix}:nodes"),
            assignments: format!("{prefix}:assignments"),
            events: format!("{prefix}:events"),
            rebalance_lock: format!("{prefix}:rebalance:lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalgrid_core::{PodKind, WorkerKind};

    #[test]
    fn kinds_do_not_share_keys() {
        let pod = StoreKeys::for_kind::<PodKind>();
        let worker = StoreKeys::for_kind::<WorkerKind>();
        assert_eq!(pod.assignments, "signalgrid:pod:assignments");
        assert_eq!(worker.rebalance_lock, "signalgrid:worker:rebalance:lock");
        assert_ne!(pod.nodes, worker.nodes);
    }
}

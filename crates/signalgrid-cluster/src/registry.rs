//! Node registry — tracks cluster node state.
//!
//! Holds the in-memory view of every node and keeps the hash ring in step:
//! a node is on the ring exactly while it is in the registry. The map lock
//! is a plain `std::sync::RwLock` and is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use signalgrid_core::{InstrumentKey, NodeId, RegistryConfig, epoch_millis};
use signalgrid_ring::HashRing;

use crate::node::{Heartbeat, Node, NodeStatus};

/// Registry of nodes for one resource kind.
pub struct NodeRegistry {
    ring: Arc<HashRing>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    /// Failure detection threshold.
    heartbeat_timeout: Duration,
    overload_enter: f64,
    overload_exit: f64,
}

impl NodeRegistry {
    /// Create a registry that places nodes on `ring`.
    pub fn new(ring: Arc<HashRing>, config: &RegistryConfig) -> Self {
        Self {
            ring,
            nodes: RwLock::new(HashMap::new()),
            heartbeat_timeout: config.heartbeat_timeout,
            overload_enter: config.overload_enter,
            overload_exit: config.overload_exit,
        }
    }

    /// Set the failure detection timeout.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Register a node and place it on the ring.
    ///
    /// Returns false (and changes nothing) if the node is already registered.
    pub fn register(&self, node_id: &str, capacity: u32) -> bool {
        self.register_at(node_id, capacity, epoch_millis())
    }

    pub fn register_at(&self, node_id: &str, capacity: u32, now_ms: u64) -> bool {
        let mut nodes = self.write();
        if nodes.contains_key(node_id) {
            warn!(%node_id, "node already registered");
            return false;
        }
        nodes.insert(node_id.to_string(), Node::new(node_id, capacity, now_ms));
        self.ring.add_node(node_id);
        info!(%node_id, capacity, "node registered");
        true
    }

    /// Merge a node record read from the coordination store.
    ///
    /// Unknown nodes are added (and placed on the ring). For known nodes the
    /// newer heartbeat wins; local assignments are kept. Returns true if the
    /// node was new.
    pub fn restore(&self, mut record: Node) -> bool {
        let mut nodes = self.write();
        match nodes.get_mut(&record.node_id) {
            Some(existing) => {
                if record.last_heartbeat > existing.last_heartbeat {
                    existing.last_heartbeat = record.last_heartbeat;
                    existing.cpu_usage = record.cpu_usage;
                    existing.memory_usage = record.memory_usage;
                    existing.computation_rate = record.computation_rate;
                    if existing.status != NodeStatus::Draining {
                        existing.status = record.status;
                    }
                }
                false
            }
            None => {
                record.clear_assignments();
                let node_id = record.node_id.clone();
                self.ring.add_node(&node_id);
                nodes.insert(node_id.clone(), record);
                debug!(%node_id, "node learned from store");
                true
            }
        }
    }

    /// Remove a node from the registry and purge its ring points.
    ///
    /// Callers reassign the node's instruments first.
    pub fn remove(&self, node_id: &str) -> Option<Node> {
        let removed = self.write().remove(node_id);
        if removed.is_some() {
            self.ring.remove_node(node_id);
            info!(%node_id, "node removed from registry");
        }
        removed
    }

    /// Mark a node DRAINING. Returns false if it is unknown.
    pub fn begin_drain(&self, node_id: &str) -> bool {
        let mut nodes = self.write();
        match nodes.get_mut(node_id) {
            Some(node) => {
                node.status = NodeStatus::Draining;
                info!(%node_id, load = node.current_load, "node draining");
                true
            }
            None => false,
        }
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    /// Record a heartbeat and re-evaluate READY/OVERLOADED.
    ///
    /// Returns false for unknown nodes.
    pub fn heartbeat(&self, node_id: &str, hb: Heartbeat) -> bool {
        self.heartbeat_at(node_id, hb, epoch_millis())
    }

    pub fn heartbeat_at(&self, node_id: &str, hb: Heartbeat, now_ms: u64) -> bool {
        let mut nodes = self.write();
        let Some(node) = nodes.get_mut(node_id) else {
            warn!(%node_id, "heartbeat from unknown node");
            return false;
        };
        node.cpu_usage = hb.cpu_usage;
        node.memory_usage = hb.memory_usage;
        node.computation_rate = hb.computation_rate;
        node.last_heartbeat = now_ms;
        self.evaluate_status(node);
        debug!(%node_id, cpu = hb.cpu_usage, memory = hb.memory_usage, "heartbeat received");
        true
    }

    /// Apply the overload hysteresis to one node.
    fn evaluate_status(&self, node: &mut Node) {
        match node.status {
            NodeStatus::Ready
                if node.cpu_usage > self.overload_enter
                    || node.memory_usage > self.overload_enter =>
            {
                node.status = NodeStatus::Overloaded;
                warn!(
                    node_id = %node.node_id,
                    cpu = node.cpu_usage,
                    memory = node.memory_usage,
                    "node overloaded"
                );
            }
            NodeStatus::Overloaded
                if node.cpu_usage < self.overload_exit
                    && node.memory_usage < self.overload_exit =>
            {
                node.status = NodeStatus::Ready;
                info!(node_id = %node.node_id, "node recovered from overload");
            }
            _ => {}
        }
    }

    /// Nodes whose last heartbeat is older than the timeout at `now_ms`.
    pub fn stale_nodes(&self, now_ms: u64) -> Vec<NodeId> {
        let timeout_ms = self.heartbeat_timeout.as_millis() as u64;
        let mut stale: Vec<NodeId> = self
            .read()
            .values()
            .filter(|n| now_ms.saturating_sub(n.last_heartbeat) > timeout_ms)
            .map(|n| n.node_id.clone())
            .collect();
        stale.sort();
        stale
    }

    // ── Assignment bookkeeping ─────────────────────────────────────

    /// Move `instrument` from `from` (if any) to `to` under one lock, so
    /// both loads change together. Returns false if `to` is unknown.
    pub fn move_instrument(&self, instrument: &str, from: Option<&str>, to: &str) -> bool {
        let mut nodes = self.write();
        if !nodes.contains_key(to) {
            return false;
        }
        if let Some(from) = from
            && let Some(old) = nodes.get_mut(from)
        {
            old.detach(instrument);
        }
        if let Some(new) = nodes.get_mut(to) {
            new.attach(instrument);
        }
        true
    }

    /// Drop `instrument` from `node_id`'s assignments.
    pub fn release(&self, node_id: &str, instrument: &str) -> bool {
        self.write()
            .get_mut(node_id)
            .is_some_and(|n| n.detach(instrument))
    }

    /// Rebuild every node's assignment set from an authoritative map.
    /// Entries pointing at unknown nodes are ignored.
    pub fn reset_assignments(&self, assignments: &HashMap<InstrumentKey, NodeId>) {
        let mut nodes = self.write();
        for node in nodes.values_mut() {
            node.clear_assignments();
        }
        for (instrument, node_id) in assignments {
            if let Some(node) = nodes.get_mut(node_id) {
                node.attach(instrument);
            }
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Snapshot of one node record.
    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.read().get(node_id).cloned()
    }

    /// Whether `node_id` is registered, in any status.
    pub fn contains(&self, node_id: &str) -> bool {
        self.read().contains_key(node_id)
    }

    /// Whether `node_id` is registered and READY.
    pub fn is_ready(&self, node_id: &str) -> bool {
        self.read().get(node_id).is_some_and(Node::is_ready)
    }

    /// All nodes, ordered by id.
    pub fn list(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// READY nodes, ordered by id.
    pub fn ready_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .read()
            .values()
            .filter(|n| n.is_ready())
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Number of READY nodes.
    pub fn ready_count(&self) -> usize {
        self.read().values().filter(|n| n.is_ready()).count()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Arc::new(HashRing::new(150)), &RegistryConfig::default())
    }

    fn hb(cpu: f64, memory: f64) -> Heartbeat {
        Heartbeat {
            cpu_usage: cpu,
            memory_usage: memory,
            computation_rate: 10.0,
        }
    }

    #[test]
    fn register_adds_node_and_ring_points() {
        let reg = registry();
        assert!(reg.register("node-a", 100));

        let node = reg.get("node-a").unwrap();
        assert_eq!(node.capacity, 100);
        assert_eq!(node.current_load, 0);
        assert_eq!(node.status, NodeStatus::Ready);
        assert!(reg.ring().contains("node-a"));
        assert_eq!(reg.ring().point_count(), 150);
    }

    #[test]
    fn duplicate_register_fails_softly() {
        let reg = registry();
        assert!(reg.register("node-a", 100));
        assert!(!reg.register("node-a", 50));
        assert_eq!(reg.get("node-a").unwrap().capacity, 100);
        assert_eq!(reg.ring().point_count(), 150);
    }

    #[test]
    fn heartbeat_unknown_node_returns_false() {
        let reg = registry();
        assert!(!reg.heartbeat("ghost", hb(0.1, 0.1)));
    }

    #[test]
    fn heartbeat_updates_usage() {
        let reg = registry();
        reg.register_at("node-a", 100, 1_000);
        assert!(reg.heartbeat_at("node-a", hb(0.4, 0.5), 2_000));

        let node = reg.get("node-a").unwrap();
        assert_eq!(node.cpu_usage, 0.4);
        assert_eq!(node.memory_usage, 0.5);
        assert_eq!(node.computation_rate, 10.0);
        assert_eq!(node.last_heartbeat, 2_000);
    }

    #[test]
    fn overload_hysteresis() {
        let reg = registry();
        reg.register("node-a", 100);

        reg.heartbeat("node-a", hb(0.95, 0.2));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Overloaded);

        // Between the thresholds: stays overloaded.
        reg.heartbeat("node-a", hb(0.8, 0.2));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Overloaded);

        // cpu recovered but memory still high.
        reg.heartbeat("node-a", hb(0.5, 0.75));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Overloaded);

        reg.heartbeat("node-a", hb(0.5, 0.5));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Ready);

        // Between the thresholds from READY: stays ready.
        reg.heartbeat("node-a", hb(0.85, 0.85));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Ready);

        reg.heartbeat("node-a", hb(0.2, 0.91));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Overloaded);
    }

    #[test]
    fn draining_is_terminal() {
        let reg = registry();
        reg.register("node-a", 100);
        assert!(reg.begin_drain("node-a"));
        reg.heartbeat("node-a", hb(0.99, 0.99));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Draining);
        reg.heartbeat("node-a", hb(0.1, 0.1));
        assert_eq!(reg.get("node-a").unwrap().status, NodeStatus::Draining);
        assert!(!reg.is_ready("node-a"));
        assert!(!reg.begin_drain("ghost"));
    }

    #[test]
    fn stale_node_detection() {
        let reg = registry().with_heartbeat_timeout(Duration::from_secs(60));
        reg.register_at("node-a", 100, 0);
        reg.register_at("node-b", 100, 0);
        reg.heartbeat_at("node-a", hb(0.1, 0.1), 50_000);

        // 60s exactly is not yet stale.
        assert!(reg.stale_nodes(60_000).is_empty());
        assert_eq!(reg.stale_nodes(60_001), vec!["node-b".to_string()]);
        assert_eq!(reg.stale_nodes(200_000).len(), 2);
    }

    #[test]
    fn remove_purges_ring() {
        let reg = registry();
        reg.register("node-a", 100);
        reg.register("node-b", 100);

        let removed = reg.remove("node-a").unwrap();
        assert_eq!(removed.node_id, "node-a");
        assert!(!reg.ring().contains("node-a"));
        assert_eq!(reg.ring().point_count(), 150);
        assert!(reg.remove("node-a").is_none());
    }

    #[test]
    fn move_instrument_updates_both_loads() {
        let reg = registry();
        reg.register("node-a", 100);
        reg.register("node-b", 100);

        assert!(reg.move_instrument("AAPL", None, "node-a"));
        assert_eq!(reg.get("node-a").unwrap().current_load, 1);

        assert!(reg.move_instrument("AAPL", Some("node-a"), "node-b"));
        assert_eq!(reg.get("node-a").unwrap().current_load, 0);
        assert_eq!(reg.get("node-b").unwrap().current_load, 1);

        // Unknown target leaves everything untouched.
        assert!(!reg.move_instrument("AAPL", Some("node-b"), "ghost"));
        assert_eq!(reg.get("node-b").unwrap().current_load, 1);

        assert!(reg.release("node-b", "AAPL"));
        assert_eq!(reg.get("node-b").unwrap().current_load, 0);
    }

    #[test]
    fn reset_assignments_rebuilds_loads() {
        let reg = registry();
        reg.register("node-a", 100);
        reg.register("node-b", 100);
        reg.move_instrument("OLD", None, "node-a");

        let mut map = HashMap::new();
        map.insert("AAPL".to_string(), "node-b".to_string());
        map.insert("MSFT".to_string(), "node-b".to_string());
        map.insert("TSLA".to_string(), "ghost".to_string());
        reg.reset_assignments(&map);

        assert_eq!(reg.get("node-a").unwrap().current_load, 0);
        let b = reg.get("node-b").unwrap();
        assert_eq!(b.current_load, 2);
        assert_eq!(
            b.assigned().iter().cloned().collect::<Vec<_>>(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
    }

    #[test]
    fn restore_adds_unknown_and_merges_newer_heartbeat() {
        let reg = registry();
        reg.register_at("node-a", 100, 1_000);

        let mut remote = Node::new("node-b", 80, 5_000);
        remote.current_load = 7; // stale count from another process
        assert!(reg.restore(remote));
        assert!(reg.ring().contains("node-b"));
        assert_eq!(reg.get("node-b").unwrap().current_load, 0);

        let mut newer = Node::new("node-a", 100, 9_000);
        newer.cpu_usage = 0.42;
        assert!(!reg.restore(newer));
        let a = reg.get("node-a").unwrap();
        assert_eq!(a.last_heartbeat, 9_000);
        assert_eq!(a.cpu_usage, 0.42);

        let older = Node::new("node-a", 100, 2_000);
        reg.restore(older);
        assert_eq!(reg.get("node-a").unwrap().last_heartbeat, 9_000);
    }

    #[test]
    fn ready_nodes_excludes_overloaded_and_draining() {
        let reg = registry();
        reg.register("node-a", 100);
        reg.register("node-b", 100);
        reg.register("node-c", 100);
        reg.heartbeat("node-b", hb(0.99, 0.1));
        reg.begin_drain("node-c");

        let ready: Vec<_> = reg.ready_nodes().into_iter().map(|n| n.node_id).collect();
        assert_eq!(ready, vec!["node-a".to_string()]);
        assert_eq!(reg.ready_count(), 1);
        assert_eq!(reg.len(), 3);
    }
}

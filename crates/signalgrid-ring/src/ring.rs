//! The hash ring.
//!
//! All mutation goes through one ring-wide `RwLock`: points are a single
//! sorted vector, so adding or removing a node touches global state.
//! Lookups take the read side and never block each other.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use signalgrid_core::NodeId;

/// One virtual node position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingPoint {
    pub hash: u64,
    pub node_id: NodeId,
    /// Insertion sequence; orders points that share a hash.
    seq: u64,
}

#[derive(Debug, Default)]
struct RingState {
    /// Sorted by `(hash, seq)`.
    points: Vec<RingPoint>,
    nodes: BTreeSet<NodeId>,
    next_seq: u64,
}

/// Consistent-hash ring shared by every coordinator in a process.
#[derive(Debug)]
pub struct HashRing {
    virtual_nodes: usize,
    state: RwLock<RingState>,
}

/// Hash a key onto the ring: the first 8 bytes of its SHA-256 digest.
pub fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

impl HashRing {
    /// Create an empty ring placing `virtual_nodes` points per node.
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            state: RwLock::new(RingState::default()),
        }
    }

    /// Points placed per physical node.
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    fn read(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a node's virtual points on the ring.
    ///
    /// Re-adding a node that is already present changes nothing and
    /// returns false.
    pub fn add_node(&self, node_id: &str) -> bool {
        let mut state = self.write();
        if state.nodes.contains(node_id) {
            warn!(%node_id, "node already on ring, ignoring add");
            return false;
        }

        for i in 0..self.virtual_nodes {
            let hash = hash_key(&format!("{node_id}:{i}"));
            let seq = state.next_seq;
            state.next_seq += 1;
            // New points have the highest seq, so they go after equal hashes.
            let pos = state.points.partition_point(|p| p.hash <= hash);
            state.points.insert(
                pos,
                RingPoint {
                    hash,
                    node_id: node_id.to_string(),
                    seq,
                },
            );
        }
        state.nodes.insert(node_id.to_string());

        debug!(
            %node_id,
            points = self.virtual_nodes,
            total_points = state.points.len(),
            "node added to ring"
        );
        true
    }

    /// Remove every point owned by `node_id`. Returns how many were removed.
    pub fn remove_node(&self, node_id: &str) -> usize {
        let mut state = self.write();
        if !state.nodes.remove(node_id) {
            return 0;
        }
        let before = state.points.len();
        state.points.retain(|p| p.node_id != node_id);
        let removed = before - state.points.len();
        debug!(%node_id, removed, "node removed from ring");
        removed
    }

    /// Up to `count` distinct nodes for `key`, walking clockwise from the
    /// key's hash and skipping anything in `exclude`.
    ///
    /// The first entry is the key's primary owner.
    pub fn locate(&self, key: &str, exclude: &[&str], count: usize) -> Vec<NodeId> {
        let state = self.read();
        let n = state.points.len();
        if n == 0 || count == 0 {
            return Vec::new();
        }

        let hash = hash_key(key);
        let start = state.points.partition_point(|p| p.hash < hash) % n;

        let mut found: Vec<NodeId> = Vec::with_capacity(count);
        for offset in 0..n {
            let point = &state.points[(start + offset) % n];
            if exclude.contains(&point.node_id.as_str())
                || found.iter().any(|f| f == &point.node_id)
            {
                continue;
            }
            found.push(point.node_id.clone());
            if found.len() == count {
                break;
            }
        }
        found
    }

    /// The primary owner of `key`, if the ring has any nodes.
    pub fn node_for(&self, key: &str) -> Option<NodeId> {
        self.locate(key, &[], 1).into_iter().next()
    }

    /// Whether `node_id` currently has points on the ring.
    pub fn contains(&self, node_id: &str) -> bool {
        self.read().nodes.contains(node_id)
    }

    /// Physical nodes on the ring, in lexicographic order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.read().nodes.iter().cloned().collect()
    }

    /// Number of physical nodes.
    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Number of virtual points; always `node_count() * virtual_nodes()`.
    pub fn point_count(&self) -> usize {
        self.read().points.len()
    }

    /// Snapshot of the sorted points (for diagnostics).
    pub fn points(&self) -> Vec<RingPoint> {
        self.read().points.clone()
    }
}

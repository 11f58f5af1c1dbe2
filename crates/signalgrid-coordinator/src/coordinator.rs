//! Assignment coordinator — which node owns which instrument.
//!
//! One coordinator per resource kind. It owns the node registry (and through
//! it the hash ring), a local cache of the instrument → node map, and the
//! per-instrument locks that serialize assignment changes.
//!
//! # Write ordering
//!
//! Every assignment change is written to the coordination store first and
//! applied to the local cache only once the write succeeded. A failed or
//! timed-out write leaves the cache untouched and reaches the caller as
//! `TransientStore`. Node load figures are written through lazily by
//! `persist_dirty`.
//!
//! # Locks
//!
//! ```text
//! per-instrument  tokio::sync::Mutex   held across the store write
//! assignments     std::sync::RwLock    never held across .await
//! registry        std::sync::RwLock    (inside NodeRegistry)
//! ring            std::sync::RwLock    (inside HashRing)
//! ```
//!
//! The assignment map lock is always taken before the registry's.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use signalgrid_cluster::{Heartbeat, Node, NodeRegistry, NodeStatus};
use signalgrid_core::{
    AssignmentConfig, GridConfig, InstrumentKey, NodeId, RebalanceConfig, ResourceKind,
    epoch_millis,
};
use signalgrid_ring::HashRing;
use signalgrid_state::{CoordinationStore, StateError, StateResult};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::GridEvent;
use crate::keys::StoreKeys;
use crate::rebalance::{self, RebalancePlan};

/// What happened to a departing node's instruments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Evacuation {
    pub reassigned: usize,
    /// Left without an owner; resolved by the next `assign`.
    pub unassigned: usize,
}

/// Outcome of one health sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Nodes declared failed and removed.
    pub failed: Vec<NodeId>,
    /// Nodes whose failure handling was interrupted; retried next sweep.
    pub errors: Vec<(NodeId, CoordinatorError)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub capacity: u32,
    pub current_load: u32,
    pub load_ratio: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub computation_rate: f64,
    pub last_heartbeat: u64,
}

impl From<&Node> for NodeSummary {
    fn from(n: &Node) -> Self {
        Self {
            node_id: n.node_id.clone(),
            status: n.status,
            capacity: n.capacity,
            current_load: n.current_load,
            load_ratio: n.load_ratio(),
            cpu_usage: n.cpu_usage,
            memory_usage: n.memory_usage,
            computation_rate: n.computation_rate,
            last_heartbeat: n.last_heartbeat,
        }
    }
}

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub kind: &'static str,
    pub nodes: Vec<NodeSummary>,
    pub ready_nodes: usize,
    pub assignments: usize,
    pub ring_points: usize,
}

// ── Builder ────────────────────────────────────────────────────────

/// Wires a coordinator to its coordination store.
pub struct CoordinatorBuilder<K: ResourceKind> {
    config: GridConfig,
    store: Option<Arc<dyn CoordinationStore>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> CoordinatorBuilder<K> {
    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fails with `Configuration` if no store was given or the config is
    /// invalid.
    pub fn build(self) -> CoordinatorResult<AssignmentCoordinator<K>> {
        let store = self.store.ok_or_else(|| {
            CoordinatorError::Configuration(format!(
                "no coordination store configured for {} assignments",
                K::NAME
            ))
        })?;
        self.config.validate()?;

        let ring = Arc::new(HashRing::new(self.config.ring.virtual_nodes));
        Ok(AssignmentCoordinator {
            store,
            registry: NodeRegistry::new(ring, &self.config.registry),
            assignments: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            dirty: Mutex::new(BTreeSet::new()),
            keys: StoreKeys::for_kind::<K>(),
            assignment: self.config.assignment.clone(),
            rebalance: self.config.rebalance.clone(),
            store_timeout: self.config.store.timeout,
            _kind: PhantomData,
        })
    }
}

// ── Coordinator ────────────────────────────────────────────────────

pub struct AssignmentCoordinator<K: ResourceKind> {
    store: Arc<dyn CoordinationStore>,
    registry: NodeRegistry,
    /// Local cache of the store's assignment hash.
    assignments: RwLock<HashMap<InstrumentKey, NodeId>>,
    locks: Mutex<HashMap<InstrumentKey, Arc<tokio::sync::Mutex<()>>>>,
    /// Nodes whose record changed since the last write-through.
    dirty: Mutex<BTreeSet<NodeId>>,
    keys: StoreKeys,
    assignment: AssignmentConfig,
    rebalance: RebalanceConfig,
    store_timeout: Duration,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> AssignmentCoordinator<K> {
    pub fn builder(config: GridConfig) -> CoordinatorBuilder<K> {
        CoordinatorBuilder {
            config,
            store: None,
            _kind: PhantomData,
        }
    }

    pub fn kind(&self) -> &'static str {
        K::NAME
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        self.registry.ring()
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    fn read_assignments(&self) -> RwLockReadGuard<'_, HashMap<InstrumentKey, NodeId>> {
        self.assignments.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_assignments(&self) -> RwLockWriteGuard<'_, HashMap<InstrumentKey, NodeId>> {
        self.assignments.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dirty(&self) -> MutexGuard<'_, BTreeSet<NodeId>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty<'a>(&self, nodes: impl IntoIterator<Item = &'a str>) {
        let mut dirty = self.lock_dirty();
        for node_id in nodes {
            dirty.insert(node_id.to_string());
        }
    }

    fn instrument_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop per-instrument locks nobody is holding or waiting on.
    fn prune_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Run one store call under the store timeout.
    async fn store_call<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = StateResult<T>>,
    ) -> StateResult<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    kind = K::NAME,
                    op,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "coordination store call timed out"
                );
                Err(StateError::Timeout {
                    op,
                    after: self.store_timeout,
                })
            }
        }
    }

    /// Publish an event. Failures are logged; they never fail the caller.
    async fn emit(&self, event: GridEvent) {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = K::NAME, event = event.kind(), error = %e, "failed to encode event");
                return;
            }
        };
        if let Err(e) = self
            .store_call("publish", self.store.publish(&self.keys.events, &json))
            .await
        {
            warn!(kind = K::NAME, event = event.kind(), error = %e, "failed to publish event");
        }
    }

    /// Receive every `GridEvent` (as JSON) published for this kind.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.store.subscribe(&self.keys.events)
    }

    // ── Assignment ─────────────────────────────────────────────────

    /// Current owner from the local cache, if any.
    pub fn owner_of(&self, key: &str) -> Option<NodeId> {
        self.read_assignments().get(key).cloned()
    }

    /// Snapshot of the local assignment cache.
    pub fn assignments(&self) -> HashMap<InstrumentKey, NodeId> {
        self.read_assignments().clone()
    }

    pub fn assignment_count(&self) -> usize {
        self.read_assignments().len()
    }

    /// The owner, if it is still READY.
    fn live_owner(&self, key: &str) -> Option<NodeId> {
        self.owner_of(key)
            .filter(|owner| self.registry.is_ready(owner))
    }

    /// Resolve the node that owns `key`, assigning it if needed.
    ///
    /// An existing assignment to a READY node is always returned unchanged.
    /// Otherwise the candidates are `preferred` (when registered) or the
    /// first ring candidates, and the least-loaded READY one below the
    /// overload threshold wins. When none qualifies the least-loaded READY
    /// node in the whole cluster is used. With no READY node at all this
    /// fails with `NoAvailableNode`.
    pub async fn assign(&self, key: &str, preferred: Option<&str>) -> CoordinatorResult<NodeId> {
        if let Some(owner) = self.live_owner(key) {
            return Ok(owner);
        }

        let lock = self.instrument_lock(key);
        let _guard = lock.lock().await;
        if let Some(owner) = self.live_owner(key) {
            return Ok(owner);
        }

        let node_id = self.select_node(key, preferred, &[])?;
        let previous = self.commit(key, &node_id).await?;
        debug!(
            kind = K::NAME,
            instrument = %key,
            node_id = %node_id,
            previous = ?previous,
            "instrument assigned"
        );
        Ok(node_id)
    }

    /// Move `key` to a new owner chosen as in `assign`, never one of
    /// `exclude`. Used by failure handling.
    pub async fn reassign(&self, key: &str, exclude: &[&str]) -> CoordinatorResult<NodeId> {
        let lock = self.instrument_lock(key);
        let _guard = lock.lock().await;

        let node_id = self.select_node(key, None, exclude)?;
        let previous = self.commit(key, &node_id).await?;
        info!(
            kind = K::NAME,
            instrument = %key,
            from = ?previous,
            to = %node_id,
            "instrument reassigned"
        );
        Ok(node_id)
    }

    /// Point `key` at `node_id`, which must be READY. Returns the previous
    /// owner.
    pub async fn update_assignment(
        &self,
        key: &str,
        node_id: &str,
    ) -> CoordinatorResult<Option<NodeId>> {
        match self.registry.get(node_id) {
            None => return Err(CoordinatorError::NodeNotFound(node_id.to_string())),
            Some(node) if !node.is_ready() => {
                return Err(CoordinatorError::NodeNotReady(node_id.to_string()));
            }
            Some(_) => {}
        }

        let lock = self.instrument_lock(key);
        let _guard = lock.lock().await;
        if self.owner_of(key).as_deref() == Some(node_id) {
            return Ok(Some(node_id.to_string()));
        }
        self.commit(key, node_id).await
    }

    /// Whether `node_id` is the node that should process `key`.
    ///
    /// Unregistered nodes never handle anything. For a registered node this
    /// resolves (and if necessary creates) the assignment.
    pub async fn should_handle(&self, key: &str, node_id: &str) -> CoordinatorResult<bool> {
        if !self.registry.contains(node_id) {
            return Ok(false);
        }
        Ok(self.assign(key, None).await? == node_id)
    }

    fn select_node(
        &self,
        key: &str,
        preferred: Option<&str>,
        exclude: &[&str],
    ) -> CoordinatorResult<NodeId> {
        let candidates = match preferred {
            Some(p) if self.registry.contains(p) && !exclude.contains(&p) => vec![p.to_string()],
            _ => self
                .registry
                .ring()
                .locate(key, exclude, self.assignment.candidate_count),
        };

        // min_by keeps the first of equal ratios, i.e. ring order.
        let best = candidates
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter(|n| n.is_ready() && n.load_ratio() < self.assignment.overload_threshold)
            .min_by(|a, b| a.load_ratio().total_cmp(&b.load_ratio()));
        if let Some(node) = best {
            return Ok(node.node_id);
        }

        let fallback = self
            .registry
            .ready_nodes()
            .into_iter()
            .filter(|n| !exclude.contains(&n.node_id.as_str()))
            .min_by(|a, b| a.load_ratio().total_cmp(&b.load_ratio()));
        match fallback {
            Some(node) => {
                debug!(
                    kind = K::NAME,
                    instrument = %key,
                    node_id = %node.node_id,
                    "ring candidates saturated, using least-loaded node"
                );
                Ok(node.node_id)
            }
            None => {
                warn!(kind = K::NAME, instrument = %key, "no READY node available");
                Err(CoordinatorError::NoAvailableNode(key.to_string()))
            }
        }
    }

    /// Write `key -> to` to the store, then to the cache and node loads.
    /// Caller holds the instrument lock.
    async fn commit(&self, key: &str, to: &str) -> CoordinatorResult<Option<NodeId>> {
        self.store_call(
            "hash_set",
            self.store.hash_set(&self.keys.assignments, key, to),
        )
        .await?;

        let previous = {
            let mut map = self.write_assignments();
            let previous = map.get(key).cloned();
            if !self.registry.move_instrument(key, previous.as_deref(), to) {
                warn!(kind = K::NAME, instrument = %key, node_id = %to, "target node left during assignment");
                return Err(CoordinatorError::ConcurrentModification(key.to_string()));
            }
            map.insert(key.to_string(), to.to_string());
            previous
        };

        self.mark_dirty(previous.iter().map(String::as_str).chain([to]));
        Ok(previous)
    }

    /// Remove `key`'s assignment if `owner` still holds it.
    async fn unassign(&self, key: &str, owner: &str) -> CoordinatorResult<()> {
        let lock = self.instrument_lock(key);
        let _guard = lock.lock().await;
        if self.owner_of(key).as_deref() != Some(owner) {
            return Ok(());
        }

        self.store_call(
            "hash_delete",
            self.store.hash_delete(&self.keys.assignments, key),
        )
        .await?;
        self.write_assignments().remove(key);
        self.registry.release(owner, key);
        self.mark_dirty([owner]);
        debug!(kind = K::NAME, instrument = %key, node_id = %owner, "instrument left unassigned");
        Ok(())
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Register a node. Returns false (and logs) if it is already known.
    pub async fn register_node(&self, node_id: &str, capacity: u32) -> CoordinatorResult<bool> {
        self.register_node_at(node_id, capacity, epoch_millis()).await
    }

    pub async fn register_node_at(
        &self,
        node_id: &str,
        capacity: u32,
        now_ms: u64,
    ) -> CoordinatorResult<bool> {
        if self.registry.contains(node_id) {
            warn!(kind = K::NAME, %node_id, "node already registered");
            return Ok(false);
        }

        let record = encode(&Node::new(node_id, capacity, now_ms))?;
        self.store_call(
            "hash_set",
            self.store.hash_set(&self.keys.nodes, node_id, &record),
        )
        .await?;
        if !self.registry.register_at(node_id, capacity, now_ms) {
            return Ok(false);
        }

        self.emit(GridEvent::NodeRegistered {
            node_id: node_id.to_string(),
            capacity,
        })
        .await;
        Ok(true)
    }

    /// Record a heartbeat. The record is written through by `persist_dirty`.
    pub fn heartbeat(&self, node_id: &str, hb: Heartbeat) -> CoordinatorResult<()> {
        self.heartbeat_at(node_id, hb, epoch_millis())
    }

    pub fn heartbeat_at(&self, node_id: &str, hb: Heartbeat, now_ms: u64) -> CoordinatorResult<()> {
        if !self.registry.heartbeat_at(node_id, hb, now_ms) {
            return Err(CoordinatorError::NodeNotFound(node_id.to_string()));
        }
        self.mark_dirty([node_id]);
        Ok(())
    }

    /// Stop new assignments to `node_id` and move its instruments away.
    /// The node stays registered as DRAINING.
    pub async fn drain_node(&self, node_id: &str) -> CoordinatorResult<Evacuation> {
        if !self.registry.begin_drain(node_id) {
            return Err(CoordinatorError::NodeNotFound(node_id.to_string()));
        }
        self.mark_dirty([node_id]);
        let evacuation = self.evacuate(node_id).await?;
        info!(
            kind = K::NAME,
            %node_id,
            reassigned = evacuation.reassigned,
            unassigned = evacuation.unassigned,
            "node drained"
        );
        Ok(evacuation)
    }

    /// Graceful removal: drain, purge from ring and registry, announce.
    pub async fn unregister_node(&self, node_id: &str) -> CoordinatorResult<Evacuation> {
        let evacuation = self.drain_node(node_id).await?;
        self.purge(node_id).await?;
        self.emit(GridEvent::NodeUnregistered {
            node_id: node_id.to_string(),
            reassigned: evacuation.reassigned,
            unassigned: evacuation.unassigned,
        })
        .await;
        Ok(evacuation)
    }

    /// Reassign every instrument `node_id` owns, excluding it as a target.
    /// Instruments nobody can take are left unassigned.
    async fn evacuate(&self, node_id: &str) -> CoordinatorResult<Evacuation> {
        let owned: Vec<InstrumentKey> = self
            .registry
            .get(node_id)
            .map(|n| n.assigned().iter().cloned().collect())
            .unwrap_or_default();

        let mut evacuation = Evacuation::default();
        for key in owned {
            match self.reassign(&key, &[node_id]).await {
                Ok(_) => evacuation.reassigned += 1,
                Err(CoordinatorError::NoAvailableNode(_)) => {
                    self.unassign(&key, node_id).await?;
                    evacuation.unassigned += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(evacuation)
    }

    /// Delete the node record from the store, then from ring and registry.
    async fn purge(&self, node_id: &str) -> CoordinatorResult<()> {
        self.store_call(
            "hash_delete",
            self.store.hash_delete(&self.keys.nodes, node_id),
        )
        .await?;

        {
            let mut map = self.write_assignments();
            map.retain(|_, owner| owner != node_id);
            self.registry.remove(node_id);
        }
        self.lock_dirty().remove(node_id);
        Ok(())
    }

    // ── Failure detection ──────────────────────────────────────────

    /// Remove every node whose heartbeat is older than the timeout.
    pub async fn health_sweep(&self) -> SweepReport {
        self.health_sweep_at(epoch_millis()).await
    }

    pub async fn health_sweep_at(&self, now_ms: u64) -> SweepReport {
        let mut report = SweepReport::default();
        for node_id in self.registry.stale_nodes(now_ms) {
            match self.fail_node(&node_id, now_ms).await {
                Ok(true) => report.failed.push(node_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(kind = K::NAME, %node_id, error = %e, "failed node handling interrupted");
                    report.errors.push((node_id, e));
                }
            }
        }
        report
    }

    async fn fail_node(&self, node_id: &str, now_ms: u64) -> CoordinatorResult<bool> {
        let Some(node) = self.registry.get(node_id) else {
            return Ok(false);
        };
        warn!(
            kind = K::NAME,
            %node_id,
            silent_ms = now_ms.saturating_sub(node.last_heartbeat),
            "node missed heartbeat deadline"
        );

        self.registry.begin_drain(node_id);
        let evacuation = self.evacuate(node_id).await?;
        self.purge(node_id).await?;

        warn!(
            kind = K::NAME,
            %node_id,
            reassigned = evacuation.reassigned,
            unassigned = evacuation.unassigned,
            "node failed and removed"
        );
        self.emit(GridEvent::NodeFailure {
            node_id: node_id.to_string(),
            last_heartbeat: node.last_heartbeat,
            reassigned: evacuation.reassigned,
            unassigned: evacuation.unassigned,
        })
        .await;
        Ok(true)
    }

    // ── Rebalancing ────────────────────────────────────────────────

    /// At least two READY nodes and their load spread above the threshold.
    pub fn should_rebalance(&self) -> bool {
        rebalance::needs_rebalance(&self.registry.ready_nodes(), self.rebalance.threshold)
    }

    pub fn create_plan(&self) -> RebalancePlan {
        rebalance::plan(&self.registry.ready_nodes(), self.rebalance.max_moves)
    }

    /// Apply a plan move by move. Moves whose source or target changed
    /// since planning are skipped. Returns the number applied.
    pub async fn execute_plan(&self, plan: &RebalancePlan) -> CoordinatorResult<usize> {
        let mut executed = 0;
        for (i, mv) in plan.moves.iter().enumerate() {
            if i > 0 && i % self.rebalance.pacing_every == 0 {
                tokio::time::sleep(self.rebalance.pacing_delay).await;
            }
            if self.owner_of(&mv.instrument).as_deref() != Some(mv.from.as_str()) {
                debug!(kind = K::NAME, instrument = %mv.instrument, "skipping stale move");
                continue;
            }
            match self.update_assignment(&mv.instrument, &mv.to).await {
                Ok(_) => {}
                Err(CoordinatorError::NodeNotFound(_) | CoordinatorError::NodeNotReady(_)) => {
                    debug!(kind = K::NAME, node_id = %mv.to, "move target no longer eligible");
                    continue;
                }
                Err(e) => return Err(e),
            }
            executed += 1;
            self.emit(GridEvent::RebalanceMove {
                instrument: mv.instrument.clone(),
                from: mv.from.clone(),
                to: mv.to.clone(),
            })
            .await;
        }

        info!(kind = K::NAME, planned = plan.len(), executed, "rebalance plan executed");
        Ok(executed)
    }

    /// One rebalance check. Skipped when balanced or while another process
    /// holds the cluster-wide cooldown key.
    pub async fn rebalance_cycle(&self) -> CoordinatorResult<usize> {
        if !self.should_rebalance() {
            debug!(kind = K::NAME, "load balanced, no rebalance needed");
            return Ok(0);
        }

        let lock_key = &self.keys.rebalance_lock;
        if self
            .store_call("get", self.store.get(lock_key))
            .await?
            .is_some()
        {
            debug!(kind = K::NAME, "rebalance cooldown active");
            return Ok(0);
        }
        if !self.rebalance.cooldown.is_zero() {
            let stamp = epoch_millis().to_string();
            self.store_call(
                "set_with_ttl",
                self.store
                    .set_with_ttl(lock_key, &stamp, Some(self.rebalance.cooldown)),
            )
            .await?;
        }

        let plan = self.create_plan();
        info!(
            kind = K::NAME,
            moves = plan.len(),
            target_load = plan.target_load,
            "rebalancing"
        );
        self.execute_plan(&plan).await
    }

    // ── Store synchronisation ──────────────────────────────────────

    /// Reload nodes and assignments from the store.
    ///
    /// The store is authoritative: nodes learned there join the local ring,
    /// nodes missing there leave it, and every node's load is recomputed
    /// from the assignment map. On a failed read the cache is kept.
    pub async fn resync(&self) -> CoordinatorResult<()> {
        // Local writes made after these snapshots may postdate the reads
        // below, so they win over whatever the store returns.
        let known_nodes: HashSet<NodeId> =
            self.registry.list().into_iter().map(|n| n.node_id).collect();
        let known_owners: HashMap<InstrumentKey, NodeId> = self.read_assignments().clone();

        let read = async {
            let nodes = self
                .store_call("hash_get_all", self.store.hash_get_all(&self.keys.nodes))
                .await?;
            let assignments = self
                .store_call(
                    "hash_get_all",
                    self.store.hash_get_all(&self.keys.assignments),
                )
                .await?;
            StateResult::Ok((nodes, assignments))
        };
        let (records, stored) = match read.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(kind = K::NAME, error = %e, "resync failed, keeping cached view");
                return Err(e.into());
            }
        };

        let mut learned = 0;
        for (node_id, raw) in &records {
            match serde_json::from_str::<Node>(raw) {
                Ok(node) if node.node_id == *node_id => {
                    if self.registry.restore(node) {
                        learned += 1;
                    }
                }
                _ => warn!(kind = K::NAME, %node_id, "skipping malformed node record"),
            }
        }

        let mut departed = 0;
        for node_id in known_nodes.iter().filter(|id| !records.contains_key(*id)) {
            if self.registry.remove(node_id).is_some() {
                self.lock_dirty().remove(node_id);
                departed += 1;
            }
        }

        {
            let mut map = self.write_assignments();
            let mut merged: HashMap<InstrumentKey, NodeId> = stored
                .into_iter()
                .filter(|(key, _)| {
                    !known_owners.contains_key(key) || map.get(key) == known_owners.get(key)
                })
                .collect();
            for (key, owner) in map.iter() {
                if known_owners.get(key) != Some(owner) {
                    merged.insert(key.clone(), owner.clone());
                }
            }
            *map = merged;
            self.registry.reset_assignments(&map);
        }
        self.prune_locks();

        debug!(
            kind = K::NAME,
            nodes = self.registry.len(),
            learned,
            departed,
            assignments = self.assignment_count(),
            "resynced from store"
        );
        Ok(())
    }

    /// Write through node records changed since the last call.
    ///
    /// Nodes no longer in the store are not written back. A newer heartbeat
    /// already in the store is kept. Returns the number written.
    pub async fn persist_dirty(&self) -> CoordinatorResult<usize> {
        let pending: Vec<NodeId> = std::mem::take(&mut *self.lock_dirty())
            .into_iter()
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let stored = match self
            .store_call("hash_get_all", self.store.hash_get_all(&self.keys.nodes))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                self.mark_dirty(pending.iter().map(String::as_str));
                return Err(e.into());
            }
        };

        let mut written = 0;
        for (i, node_id) in pending.iter().enumerate() {
            let Some(mut node) = self.registry.get(node_id) else {
                continue;
            };
            let Some(raw) = stored.get(node_id) else {
                debug!(kind = K::NAME, %node_id, "node gone from store, not persisting");
                continue;
            };
            if let Ok(remote) = serde_json::from_str::<Node>(raw)
                && remote.last_heartbeat > node.last_heartbeat
            {
                node.last_heartbeat = remote.last_heartbeat;
                node.cpu_usage = remote.cpu_usage;
                node.memory_usage = remote.memory_usage;
                node.computation_rate = remote.computation_rate;
            }

            let write = match encode(&node) {
                Ok(record) => {
                    self.store_call(
                        "hash_set",
                        self.store.hash_set(&self.keys.nodes, node_id, &record),
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = write {
                self.mark_dirty(pending[i..].iter().map(String::as_str));
                return Err(e.into());
            }
            written += 1;
        }

        debug!(kind = K::NAME, written, "node records persisted");
        Ok(written)
    }

    // ── Status ─────────────────────────────────────────────────────

    pub fn cluster_status(&self) -> ClusterStatus {
        let nodes: Vec<NodeSummary> = self.registry.list().iter().map(NodeSummary::from).collect();
        ClusterStatus {
            kind: K::NAME,
            ready_nodes: nodes.iter().filter(|n| n.status == NodeStatus::Ready).count(),
            nodes,
            assignments: self.assignment_count(),
            ring_points: self.registry.ring().point_count(),
        }
    }
}

fn encode(node: &Node) -> StateResult<String> {
    serde_json::to_string(node).map_err(|e| StateError::Serialize(e.to_string()))
}

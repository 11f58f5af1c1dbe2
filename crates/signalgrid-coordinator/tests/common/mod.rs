//! Shared fixtures for coordinator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use signalgrid_coordinator::{AssignmentCoordinator, GridEvent};
use signalgrid_core::{GridConfig, PodKind};
use signalgrid_state::{CoordinationStore, StateResult, StateStore};

pub type Coordinator = AssignmentCoordinator<PodKind>;

/// Config with short store timeouts and no pacing delay.
pub fn test_config() -> GridConfig {
    let mut config = GridConfig::default();
    config.store.timeout = Duration::from_millis(100);
    config.rebalance.pacing_delay = Duration::from_millis(1);
    config
}

pub fn coordinator_on(store: Arc<dyn CoordinationStore>, config: GridConfig) -> Coordinator {
    AssignmentCoordinator::builder(config)
        .store(store)
        .build()
        .unwrap()
}

pub fn coordinator() -> Coordinator {
    coordinator_on(Arc::new(StateStore::open_in_memory().unwrap()), test_config())
}

pub fn instruments(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("SYM{i:04}")).collect()
}

/// Drain every event currently buffered on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<String>) -> Vec<GridEvent> {
    let mut events = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        events.push(GridEvent::from_json(&raw).unwrap());
    }
    events
}

/// A store that can be made to hang, so every call hits the timeout.
///
/// A single `hash_get_all` can also be held after it has read, so local
/// writes land while a stale snapshot is in flight.
pub struct StallingStore {
    inner: StateStore,
    stalled: AtomicBool,
    held_read: Mutex<Option<HeldRead>>,
}

struct HeldRead {
    hash: String,
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

impl StallingStore {
    pub fn new() -> Self {
        Self {
            inner: StateStore::open_in_memory().unwrap(),
            stalled: AtomicBool::new(false),
            held_read: Mutex::new(None),
        }
    }

    /// Hold the next read of `hash`. The first receiver fires once the
    /// read has its snapshot; sending on the returned sender lets it finish.
    pub fn hold_next_read(&self, hash: &str) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.held_read.lock().unwrap() = Some(HeldRead {
            hash: hash.to_string(),
            started: started_tx,
            release: release_rx,
        });
        (started_rx, release_tx)
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl CoordinationStore for StallingStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        self.maybe_stall().await;
        self.inner.get(key).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StateResult<()> {
        self.maybe_stall().await;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StateResult<bool> {
        self.maybe_stall().await;
        self.inner.delete(key).await
    }

    async fn hash_get_all(&self, hash: &str) -> StateResult<HashMap<String, String>> {
        self.maybe_stall().await;
        let snapshot = self.inner.hash_get_all(hash).await;
        let held = {
            let mut slot = self.held_read.lock().unwrap();
            match slot.as_ref() {
                Some(h) if h.hash == hash => slot.take(),
                _ => None,
            }
        };
        if let Some(held) = held {
            let _ = held.started.send(());
            let _ = held.release.await;
        }
        snapshot
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> StateResult<()> {
        self.maybe_stall().await;
        self.inner.hash_set(hash, field, value).await
    }

    async fn hash_delete(&self, hash: &str, field: &str) -> StateResult<bool> {
        self.maybe_stall().await;
        self.inner.hash_delete(hash, field).await
    }

    async fn publish(&self, channel: &str, message: &str) -> StateResult<usize> {
        self.maybe_stall().await;
        self.inner.publish(channel, message).await
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.inner.subscribe(channel)
    }
}

//! The coordination-store seam.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StateResult;

/// Shared state primitives consumed by the assignment coordinator.
///
/// Implementations must be safe to share across tasks. Callers wrap every
/// call in their own timeout; implementations do not retry.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a key. Expired keys read as `None`.
    async fn get(&self, key: &str) -> StateResult<Option<String>>;

    /// Write a key, optionally expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> StateResult<()>;

    /// Remove a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> StateResult<bool>;

    /// Every field of a hash map (empty if the hash does not exist).
    async fn hash_get_all(&self, hash: &str) -> StateResult<HashMap<String, String>>;

    /// Insert or overwrite one hash field.
    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> StateResult<()>;

    /// Remove one hash field. Returns true if it existed.
    async fn hash_delete(&self, hash: &str, field: &str) -> StateResult<bool>;

    /// Publish a message. Returns the number of live local subscribers.
    async fn publish(&self, channel: &str, message: &str) -> StateResult<usize>;

    /// Subscribe to a channel.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

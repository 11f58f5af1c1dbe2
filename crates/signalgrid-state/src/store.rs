//! StateStore — redb-backed coordination store.
//!
//! Key/value entries carry an optional expiry and are filtered lazily on
//! read; `purge_expired` reclaims them. Hash fields live in their own table
//! under `{hash}\0{field}` keys so one range scan returns a whole hash.
//! Pub/sub is delivered in-process through `tokio::sync::broadcast`.
//!
//! redb transactions block (commits fsync), so every trait call runs its
//! transaction on the blocking pool and callers can bound it with a timeout.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::traits::CoordinationStore;
use crate::types::TtlValue;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Buffered messages per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Thread-safe coordination store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.open_table(HASHES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Key/value ──────────────────────────────────────────────────

    fn read_kv(&self, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let entry: TtlValue =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                if entry.is_expired(now_ms()) {
                    trace!(%key, "key expired");
                    Ok(None)
                } else {
                    Ok(Some(entry.value))
                }
            }
            None => Ok(None),
        }
    }

    fn write_kv(&self, key: &str, value: &str, ttl: Option<Duration>) -> StateResult<()> {
        let entry = TtlValue {
            value: value.to_string(),
            expires_at_ms: ttl.map(|t| now_ms().saturating_add(t.as_millis() as u64)),
        };
        let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        trace!(%key, ?ttl, "key stored");
        Ok(())
    }

    fn remove_kv(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> StateResult<usize> {
        let now = now_ms();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let v: TtlValue =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if v.is_expired(now) {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            removed = expired.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if removed > 0 {
            debug!(removed, "expired keys purged");
        }
        Ok(removed)
    }

    // ── Hashes ─────────────────────────────────────────────────────

    fn read_hash(&self, hash: &str) -> StateResult<HashMap<String, String>> {
        let (start, end) = hash_range(hash);
        let prefix_len = start.len();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HASHES).map_err(map_err!(Table))?;
        let mut fields = HashMap::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let field = key.value()[prefix_len..].to_string();
            let value = String::from_utf8(value.value().to_vec()).map_err(map_err!(Deserialize))?;
            fields.insert(field, value);
        }
        Ok(fields)
    }

    fn write_hash_field(&self, hash: &str, field: &str, value: &str) -> StateResult<()> {
        let key = hash_field_key(hash, field);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HASHES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn remove_hash_field(&self, hash: &str, field: &str) -> StateResult<bool> {
        let key = hash_field_key(hash, field);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(HASHES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Pub/sub ────────────────────────────────────────────────────

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl StateStore {
    /// Run a redb call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> StateResult<T>
    where
        F: FnOnce(&StateStore) -> StateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(map_err!(Task))?
    }
}

#[async_trait]
impl CoordinationStore for StateStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let key = key.to_string();
        self.blocking(move |s| s.read_kv(&key)).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StateResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.blocking(move |s| s.write_kv(&key, &value, ttl)).await
    }

    async fn delete(&self, key: &str) -> StateResult<bool> {
        let key = key.to_string();
        self.blocking(move |s| s.remove_kv(&key)).await
    }

    async fn hash_get_all(&self, hash: &str) -> StateResult<HashMap<String, String>> {
        let hash = hash.to_string();
        self.blocking(move |s| s.read_hash(&hash)).await
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> StateResult<()> {
        let (hash, field, value) = (hash.to_string(), field.to_string(), value.to_string());
        self.blocking(move |s| s.write_hash_field(&hash, &field, &value))
            .await
    }

    async fn hash_delete(&self, hash: &str, field: &str) -> StateResult<bool> {
        let (hash, field) = (hash.to_string(), field.to_string());
        self.blocking(move |s| s.remove_hash_field(&hash, &field))
            .await
    }

    async fn publish(&self, channel: &str, message: &str) -> StateResult<usize> {
        // No receivers is not an error for pub/sub.
        let delivered = self.sender(channel).send(message.to_string()).unwrap_or(0);
        trace!(%channel, delivered, "message published");
        Ok(delivered)
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Key/value ──────────────────────────────────────────────────

    #[tokio::test]
    async fn kv_set_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        store.set_with_ttl("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.set_with_ttl("a", "2", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn kv_ttl_expires() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .set_with_ttl("lease", "holder", Some(Duration::from_millis(0)))
            .await
            .unwrap();
        store
            .set_with_ttl("keep", "v", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert_eq!(store.get("lease").await.unwrap(), None);
        assert_eq!(store.get("keep").await.unwrap().as_deref(), Some("v"));

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn kv_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.set_with_ttl("a", "1", None).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    // ── Hashes ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn hash_fields_are_scoped_to_their_hash() {
        let store = StateStore::open_in_memory().unwrap();
        store.hash_set("assign", "AAPL", "node-a").await.unwrap();
        store.hash_set("assign", "MSFT", "node-b").await.unwrap();
        // A hash whose name extends the first must not leak into it.
        store.hash_set("assignments", "TSLA", "node-c").await.unwrap();

        let all = store.hash_get_all("assign").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["AAPL"], "node-a");
        assert_eq!(all["MSFT"], "node-b");

        assert!(store.hash_delete("assign", "AAPL").await.unwrap());
        assert!(!store.hash_delete("assign", "AAPL").await.unwrap());
        assert_eq!(store.hash_get_all("assign").await.unwrap().len(), 1);
        assert!(store.hash_get_all("nothing").await.unwrap().is_empty());
    }

    // ── Pub/sub ────────────────────────────────────────────────────

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = StateStore::open_in_memory().unwrap();
        let mut rx = store.subscribe("events");

        let delivered = store.publish("events", "hello").await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");

        // Clones share channels.
        let clone = store.clone();
        clone.publish("events", "again").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "again");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.publish("nobody", "x").await.unwrap(), 0);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.hash_set("nodes", "node-a", "{}").await.unwrap();
            store.set_with_ttl("k", "v", None).await.unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.hash_get_all("nodes").await.unwrap().len(), 1);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn blocked_commit_is_bounded_by_timeout() {
        let store = StateStore::open_in_memory().unwrap();
        // redb admits one writer at a time; holding it stalls the next commit.
        let writer = store.db.begin_write().unwrap();

        let stalled = tokio::time::timeout(
            Duration::from_millis(50),
            store.hash_set("nodes", "node-a", "{}"),
        )
        .await;
        assert!(stalled.is_err());

        // Reads are not held up by the open writer.
        assert!(store.hash_get_all("nodes").await.unwrap().is_empty());

        drop(writer);
        store.hash_set("nodes", "node-b", "{}").await.unwrap();
        assert!(store.hash_get_all("nodes").await.unwrap().contains_key("node-b"));
    }

    #[test]
    fn timeout_is_transient() {
        let err = StateError::Timeout {
            op: "get",
            after: Duration::from_secs(2),
        };
        assert!(err.is_transient());
        assert!(!StateError::Serialize("bad".into()).is_transient());
    }
}

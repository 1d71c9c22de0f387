//! C1: KV store abstraction (§4.1).
//!
//! Two named roles: `local` (fast, unbounded, session-scoped) and `sync` (cross-device,
//! byte-limited, may be absent). The core never treats a `sync` failure as fatal; callers
//! are expected to log and continue with in-memory state as authoritative.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Roughly mirrors `chrome.storage.sync`'s per-item byte budget; a serializer that targets
/// `sync` must refuse payloads above this and fall back to local-only (§9).
pub const SYNC_BYTE_LIMIT: usize = 100 * 1024;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// In-memory store. Backs both `local` and `sync` in tests and in the reference binary,
/// since no `chrome.storage` runtime is available outside a browser extension host.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.inner.lock().await.remove(key);
        Ok(())
    }
}

/// Simple single-file JSON-map store for `local`, for the reference binary where the
/// process should survive restarts. Every write rewrites the whole file; this mirrors the
/// TM's own "serialize the entire map under one well-known key" persistence style rather
/// than pretending to be a real embedded KV engine.
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let map = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    async fn flush(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let body = serde_json::to_string(map)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.insert(key.to_string(), value);
        self.flush(&guard).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.remove(key);
        self.flush(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("tm-core-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("store.json");
        {
            let store = FileStore::open(path.clone()).await.unwrap();
            store.set("a", "1".to_string()).await.unwrap();
        }
        let store = FileStore::open(path).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        tokio::fs::remove_dir_all(dir).await.ok();
    }
}

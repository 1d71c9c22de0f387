//! C3: translation memory (§4.3).
//!
//! TTL pruning always precedes LRU pruning. A read refreshes `ts`, so recency is genuine
//! LRU. The whole map is persisted as a single JSON blob under one well-known key on every
//! write, coalesced so a write already in flight makes the new one a no-op follow-up
//! (last-writer-wins): this mirrors a response cache's "evict expired, then LRU-evict, then
//! insert" ordering, generalized to survive process restarts via the KV abstraction.

use crate::kv::KvStore;
use crate::telemetry::Telemetry;
use crate::types::{now_ms, TMEntry, TMKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const LOCAL_TM_KEY: &str = "qwen-tm";

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TmStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions_ttl: u64,
    pub evictions_lru: u64,
    pub entries: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TmConfig {
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub sync_enabled: bool,
}

impl Default for TmConfig {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            ttl_ms: 0,
            sync_enabled: false,
        }
    }
}

struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions_ttl: AtomicU64,
    evictions_lru: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions_ttl: AtomicU64::new(0),
            evictions_lru: AtomicU64::new(0),
        }
    }
}

pub struct TranslationMemory {
    cfg: Mutex<TmConfig>,
    map: Mutex<HashMap<TMKey, TMEntry>>,
    counters: Counters,
    local: Arc<dyn KvStore>,
    sync: Option<Arc<dyn KvStore>>,
    write_in_flight: AtomicBool,
    write_pending: AtomicBool,
    telemetry: Option<Arc<Telemetry>>,
}

impl TranslationMemory {
    pub fn new(cfg: TmConfig, local: Arc<dyn KvStore>, sync: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            cfg: Mutex::new(cfg),
            map: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            local,
            sync,
            write_in_flight: AtomicBool::new(false),
            write_pending: AtomicBool::new(false),
            telemetry: None,
        }
    }

    /// Attaches the ambient telemetry handle so eviction counts feed `Telemetry::
    /// record_tm_eviction`, mirroring [`crate::orchestrator::Orchestrator::with_telemetry`].
    /// Optional: a TM built without one still prunes correctly, just without that counter.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Load any persisted local snapshot, and if sync replication is enabled, merge the
    /// remote snapshot in preferring the newer `ts` per key, then re-persist.
    pub async fn init(&self) -> anyhow::Result<()> {
        if let Some(blob) = self.local.get(LOCAL_TM_KEY).await? {
            self.merge_serialized(&blob);
        }
        if self.cfg.lock().sync_enabled {
            if let Some(sync) = &self.sync {
                match sync.get(LOCAL_TM_KEY).await {
                    Ok(Some(blob)) => self.merge_serialized(&blob),
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "tm sync init read failed"),
                }
            }
            self.persist().await;
        }
        Ok(())
    }

    fn merge_serialized(&self, blob: &str) {
        let entries: Vec<(TMKey, TMEntry)> = match serde_json::from_str(blob) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse tm snapshot, ignoring");
                return;
            }
        };
        let mut map = self.map.lock();
        for (key, entry) in entries {
            match map.get(&key) {
                Some(existing) if existing.ts >= entry.ts => {}
                _ => {
                    map.insert(key, entry);
                }
            }
        }
    }

    pub fn enable_sync(&self, enabled: bool) {
        self.cfg.lock().sync_enabled = enabled;
    }

    /// O(1) expected. Refreshes `ts` on hit. A TTL miss deletes the entry.
    pub fn get(&self, key: &TMKey) -> Option<TMEntry> {
        let ttl_ms = self.cfg.lock().ttl_ms;
        let now = now_ms();
        let mut map = self.map.lock();
        let expired = match map.get(key) {
            Some(entry) => ttl_ms > 0 && now.saturating_sub(entry.ts) > ttl_ms,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            map.remove(key);
            self.counters.evictions_ttl.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_tm_eviction(1);
            }
            return None;
        }
        let entry = map.get_mut(key).unwrap();
        entry.ts = now;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Stores or updates `{ text, ts = now }`, then prunes (TTL first, then LRU), then
    /// schedules an asynchronous, coalesced persist.
    pub async fn put(&self, key: TMKey, text: String) {
        {
            let mut map = self.map.lock();
            map.insert(
                key,
                TMEntry {
                    text,
                    ts: now_ms(),
                },
            );
            self.counters.sets.fetch_add(1, Ordering::Relaxed);
            self.prune_locked(&mut map);
        }
        self.schedule_persist().await;
    }

    fn prune_locked(&self, map: &mut HashMap<TMKey, TMEntry>) {
        let cfg = *self.cfg.lock();
        if cfg.ttl_ms > 0 {
            let now = now_ms();
            let before = map.len();
            map.retain(|_, entry| now.saturating_sub(entry.ts) <= cfg.ttl_ms);
            let removed = before - map.len();
            if removed > 0 {
                self.counters
                    .evictions_ttl
                    .fetch_add(removed as u64, Ordering::Relaxed);
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_tm_eviction(removed as u64);
                }
            }
        }
        if cfg.max_entries > 0 && map.len() > cfg.max_entries {
            let mut by_ts: Vec<(TMKey, u64)> =
                map.iter().map(|(k, v)| (k.clone(), v.ts)).collect();
            by_ts.sort_by_key(|(_, ts)| *ts);
            let to_remove = map.len() - cfg.max_entries;
            for (key, _) in by_ts.into_iter().take(to_remove) {
                map.remove(&key);
                self.counters.evictions_lru.fetch_add(1, Ordering::Relaxed);
            }
            if to_remove > 0 {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_tm_eviction(to_remove as u64);
                }
            }
        }
    }

    pub fn stats(&self) -> TmStats {
        TmStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            evictions_ttl: self.counters.evictions_ttl.load(Ordering::Relaxed),
            evictions_lru: self.counters.evictions_lru.load(Ordering::Relaxed),
            entries: self.map.lock().len() as u64,
        }
    }

    pub fn get_all(&self) -> Vec<(TMKey, TMEntry)> {
        self.map
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn clear(&self) {
        self.map.lock().clear();
        self.schedule_persist().await;
    }

    /// Import a `(key, text)` set, assigning fresh `ts` values, then prune and persist.
    /// `import(export(E)) ≡ E` as a set of `(key, text)` pairs; `ts` may change.
    pub async fn import(&self, entries: Vec<(TMKey, String)>) {
        {
            let mut map = self.map.lock();
            let now = now_ms();
            for (key, text) in entries {
                map.insert(key, TMEntry { text, ts: now });
            }
            self.prune_locked(&mut map);
        }
        self.schedule_persist().await;
    }

    /// Writes are coalesced: if a write is already in flight, mark one pending and return;
    /// the in-flight writer picks it up when it finishes, so the last writer always wins
    /// without unboundedly queuing persist tasks.
    async fn schedule_persist(&self) {
        if self
            .write_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.write_pending.store(true, Ordering::Release);
            return;
        }
        loop {
            self.persist().await;
            if self
                .write_pending
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
        self.write_in_flight.store(false, Ordering::Release);
    }

    async fn persist(&self) {
        let snapshot = self.get_all();
        let body = match serde_json::to_string(&snapshot) {
            Ok(b) => b,
            Err(err) => {
                tracing::error!(error = %err, "tm serialize failed");
                return;
            }
        };
        if let Err(err) = self.local.set(LOCAL_TM_KEY, body.clone()).await {
            tracing::error!(error = %err, "tm local persist failed");
        }
        if self.cfg.lock().sync_enabled {
            if let Some(sync) = &self.sync {
                if body.len() > crate::kv::SYNC_BYTE_LIMIT {
                    tracing::warn!(
                        bytes = body.len(),
                        "tm snapshot exceeds sync byte limit, skipping sync write"
                    );
                } else if let Err(err) = sync.set(LOCAL_TM_KEY, body).await {
                    tracing::warn!(error = %err, "tm sync persist failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn tm(cfg: TmConfig) -> TranslationMemory {
        TranslationMemory::new(cfg, MemoryStore::shared(), None)
    }

    fn key(s: &str) -> TMKey {
        TMKey::fingerprint("qwen", "en", "fr", s)
    }

    #[tokio::test]
    async fn ttl_eviction_removes_stale_entries() {
        let memory = tm(TmConfig {
            max_entries: 5000,
            ttl_ms: 10,
            sync_enabled: false,
        });
        memory.put(key("k1"), "v1".into()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        memory.put(key("k2"), "v2".into()).await;
        assert!(memory.get(&key("k1")).is_none());
        assert_eq!(memory.get(&key("k2")).unwrap().text, "v2");
        assert!(memory.stats().evictions_ttl >= 1);
    }

    #[tokio::test]
    async fn lru_eviction_keeps_most_recently_used() {
        let memory = tm(TmConfig {
            max_entries: 2,
            ttl_ms: 0,
            sync_enabled: false,
        });
        memory.put(key("a"), "va".into()).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        memory.put(key("b"), "vb".into()).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        // Refresh "a" so it becomes the most-recently-used entry.
        assert_eq!(memory.get(&key("a")).unwrap().text, "va");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        memory.put(key("c"), "vc".into()).await;

        assert_eq!(memory.get(&key("a")).unwrap().text, "va");
        assert!(memory.get(&key("b")).is_none());
        assert_eq!(memory.get(&key("c")).unwrap().text, "vc");
        assert!(memory.stats().evictions_lru >= 1);
    }

    #[tokio::test]
    async fn size_never_exceeds_max() {
        let memory = tm(TmConfig {
            max_entries: 3,
            ttl_ms: 0,
            sync_enabled: false,
        });
        for i in 0..20 {
            memory.put(key(&format!("k{i}")), format!("v{i}")).await;
            assert!(memory.stats().entries <= 3);
        }
    }

    #[tokio::test]
    async fn import_export_round_trips_as_a_set() {
        let memory = tm(TmConfig::default());
        memory.put(key("a"), "va".into()).await;
        memory.put(key("b"), "vb".into()).await;
        let exported: Vec<(TMKey, String)> = memory
            .get_all()
            .into_iter()
            .map(|(k, e)| (k, e.text))
            .collect();

        let memory2 = tm(TmConfig::default());
        memory2.import(exported.clone()).await;
        let mut got: Vec<(TMKey, String)> = memory2
            .get_all()
            .into_iter()
            .map(|(k, e)| (k, e.text))
            .collect();
        got.sort();
        let mut want = exported;
        want.sort();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn persists_across_reinit_from_same_local_store() {
        let local = MemoryStore::shared();
        let memory = TranslationMemory::new(TmConfig::default(), local.clone(), None);
        memory.put(key("a"), "va".into()).await;

        let memory2 = TranslationMemory::new(TmConfig::default(), local, None);
        memory2.init().await.unwrap();
        assert_eq!(memory2.get(&key("a")).unwrap().text, "va");
    }

    #[tokio::test]
    async fn attached_telemetry_counts_both_ttl_and_lru_evictions() {
        let telemetry = Arc::new(Telemetry::new());
        let memory = TranslationMemory::new(
            TmConfig {
                max_entries: 1,
                ttl_ms: 10,
                sync_enabled: false,
            },
            MemoryStore::shared(),
            None,
        )
        .with_telemetry(telemetry.clone());

        memory.put(key("a"), "va".into()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        memory.put(key("b"), "vb".into()).await;
        assert!(memory.get(&key("a")).is_none());

        let snap = telemetry.snapshot();
        assert!(snap.tm_evictions >= 1);
    }
}

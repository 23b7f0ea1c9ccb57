//! Decision Cache (C7)
//!
//! Three implementations of one capability contract — `get`/`set`/`delete`/
//! `clear`/`stats`/`close` — so the engine is oblivious to which is
//! configured (spec §9 "Cache topology"): an in-process LRU with per-entry
//! TTL, a distributed tier behind a pluggable backend trait, and a hybrid
//! L1+L2 that write-throughs both and reads L1 first.

use async_trait::async_trait;
use dashmap::DashMap;
use reaper_core::CheckResponse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Uniform capability contract implemented by every cache topology (spec
/// §9). Async throughout because the distributed tier performs network I/O;
/// the LRU tier's implementation simply never awaits anything.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Option<CheckResponse>;
    async fn set(&self, fingerprint: &str, response: CheckResponse);
    async fn delete(&self, fingerprint: &str);
    async fn clear(&self);
    fn stats(&self) -> CacheStats;
    async fn close(&self);
}

// ---------------------------------------------------------------------
// LRU tier
// ---------------------------------------------------------------------

struct Entry {
    response: CheckResponse,
    inserted_at: Instant,
}

pub struct LruCache {
    inner: parking_lot::Mutex<lru::LruCache<String, Entry>>,
    ttl: Duration,
    counters: Counters,
}

impl LruCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: parking_lot::Mutex::new(lru::LruCache::new(cap)),
            ttl,
            counters: Counters::default(),
        }
    }

    /// Default capacity/TTL per spec §4.6: 100,000 entries, 5 minute TTL.
    pub fn with_defaults() -> Self {
        Self::new(100_000, Duration::from_secs(5 * 60))
    }
}

#[async_trait]
impl DecisionCache for LruCache {
    async fn get(&self, fingerprint: &str) -> Option<CheckResponse> {
        let mut guard = self.inner.lock();
        match guard.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.response.clone())
            }
            Some(_) => {
                guard.pop(fingerprint);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, fingerprint: &str, response: CheckResponse) {
        self.inner.lock().put(
            fingerprint.to_string(),
            Entry {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    async fn delete(&self, fingerprint: &str) {
        self.inner.lock().pop(fingerprint);
    }

    async fn clear(&self) {
        self.inner.lock().clear();
    }

    fn stats(&self) -> CacheStats {
        self.counters.stats()
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------
// Distributed tier
// ---------------------------------------------------------------------

/// The shape of a distributed cache backend (e.g. Redis), consumed as a
/// contract per spec §1 ("persistent... stores... consumed through a
/// contract") rather than a hard dependency on a live client.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), String>;
    async fn delete(&self, key: &str) -> Result<(), String>;
    async fn clear(&self) -> Result<(), String>;
}

pub struct DistributedCache {
    backend: Arc<dyn DistributedBackend>,
    key_prefix: String,
    ttl: Duration,
    counters: Counters,
}

impl DistributedCache {
    pub fn new(backend: Arc<dyn DistributedBackend>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            ttl,
            counters: Counters::default(),
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.key_prefix, fingerprint)
    }
}

#[async_trait]
impl DecisionCache for DistributedCache {
    async fn get(&self, fingerprint: &str) -> Option<CheckResponse> {
        // Backend errors degrade gracefully to a miss (spec §4.6, §7
        // "Unavailable... handled locally, never bubbles from the decision
        // path").
        match self.backend.get(&self.key(fingerprint)).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(response) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(response)
                }
                Err(_) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            _ => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, fingerprint: &str, response: CheckResponse) {
        if let Ok(bytes) = serde_json::to_vec(&response) {
            let _ = self.backend.set(&self.key(fingerprint), bytes, self.ttl).await;
        }
    }

    async fn delete(&self, fingerprint: &str) {
        let _ = self.backend.delete(&self.key(fingerprint)).await;
    }

    async fn clear(&self) {
        let _ = self.backend.clear().await;
    }

    fn stats(&self) -> CacheStats {
        self.counters.stats()
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------
// Hybrid (L1 + L2) tier
// ---------------------------------------------------------------------

pub struct HybridCache {
    l1: LruCache,
    l2: DistributedCache,
}

impl HybridCache {
    pub fn new(l1: LruCache, l2: DistributedCache) -> Self {
        Self { l1, l2 }
    }
}

#[async_trait]
impl DecisionCache for HybridCache {
    async fn get(&self, fingerprint: &str) -> Option<CheckResponse> {
        if let Some(hit) = self.l1.get(fingerprint).await {
            return Some(hit);
        }
        // L1 miss: on an L2 error this behaves as L1-only for this call
        // (spec §4.6 "on L2 error, behave as L1-only for that call").
        if let Some(hit) = self.l2.get(fingerprint).await {
            self.l1.set(fingerprint, hit.clone()).await;
            return Some(hit);
        }
        None
    }

    async fn set(&self, fingerprint: &str, response: CheckResponse) {
        self.l1.set(fingerprint, response.clone()).await;
        self.l2.set(fingerprint, response).await;
    }

    async fn delete(&self, fingerprint: &str) {
        self.l1.delete(fingerprint).await;
        self.l2.delete(fingerprint).await;
    }

    async fn clear(&self) {
        self.l1.clear().await;
        self.l2.clear().await;
    }

    fn stats(&self) -> CacheStats {
        // L1 is the one the engine checks first; its hit/miss counts are
        // the ones that matter for tuning capacity/TTL.
        self.l1.stats()
    }

    async fn close(&self) {
        self.l1.close().await;
        self.l2.close().await;
    }
}

// ---------------------------------------------------------------------
// Single-flight coordination
// ---------------------------------------------------------------------

/// Collapses concurrent callers of the same key into exactly one underlying
/// computation (spec §4.6 "Single-flight is required", §9 "Model as a keyed
/// coordination map"). Built on `tokio::sync::OnceCell`: the first caller for
/// a key inserts a fresh cell and drives `get_or_init`; every other caller
/// for the same key awaits the very same `get_or_init`, which only ever runs
/// the initializer once.
pub struct SingleFlight<V: Clone + Send + Sync + 'static> {
    pending: DashMap<String, Arc<OnceCell<V>>>,
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        let cell = self
            .pending
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_init(compute).await.clone();

        // Best-effort cleanup: only remove the entry if nobody else still
        // holds a clone of this exact cell (us + the map == 2).
        if Arc::strong_count(&cell) <= 2 {
            self.pending.remove_if(key, |_, v| Arc::ptr_eq(v, &cell));
        }
        result
    }
}

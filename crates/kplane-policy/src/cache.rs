//! Compiled-policy cache with version keying, TTL expiration and LRU
//! eviction.
//!
//! Entries are keyed by policy id and remember the version they were
//! compiled from; a lookup with a different version recompiles and
//! replaces the entry, so a stale compiled form is never served after a
//! policy changes. Compile failures are cached too, so a broken policy
//! is not reparsed for every candidate.
//!
//! Lookups take a shared lock; compilation runs outside any lock and
//! only the insert takes the exclusive lock. Concurrent misses for the
//! same policy may both compile; the second insert wins, which is
//! harmless because compilation is pure.
//!
//! Cache statistics (hits, misses, evictions) are emitted as `tracing`
//! fields and exposed through [`PolicyCache::stats`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use kplane_core::PlacementPolicy;
use kplane_core::config::PolicyConfig;
use parking_lot::RwLock;
use tracing::debug;

use crate::compile::{CompileLimits, CompiledPolicy, compile};
use crate::error::PolicyResult;

struct CacheEntry {
    version: u64,
    compiled: PolicyResult<Arc<CompiledPolicy>>,
    inserted_at: Instant,
    /// Nanos since the cache epoch, for LRU.
    last_accessed_nanos: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }

    fn touch(&self, epoch: Instant) {
        self.last_accessed_nanos
            .store(nanos_since(epoch), Ordering::Relaxed);
    }
}

fn nanos_since(epoch: Instant) -> u64 {
    Instant::now().duration_since(epoch).as_nanos() as u64
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

pub struct PolicyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    limits: CompileLimits,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PolicyCache {
    pub fn new(config: &PolicyConfig) -> Self {
        Self::with_limits(config.cache_capacity, config.cache_ttl(), CompileLimits::from(config))
    }

    pub fn with_limits(capacity: usize, ttl: Duration, limits: CompileLimits) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            ttl,
            limits,
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> CompileLimits {
        self.limits
    }

    /// Return the compiled form of `policy`, compiling on a miss.
    pub fn get_or_compile(&self, policy: &PlacementPolicy) -> PolicyResult<Arc<CompiledPolicy>> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&policy.id) {
                if entry.version == policy.version && !entry.is_expired(self.ttl) {
                    entry.touch(self.epoch);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return entry.compiled.clone();
                }
            }
        }

        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            policy_id = %policy.id,
            version = policy.version,
            cache_hits = self.hits.load(Ordering::Relaxed),
            cache_misses = misses,
            "policy cache miss"
        );
        let compiled = compile(policy, self.limits).map(Arc::new);
        if self.capacity == 0 {
            return compiled;
        }

        let mut entries = self.entries.write();
        if !entries.contains_key(&policy.id) && entries.len() >= self.capacity {
            self.evict(&mut entries);
        }
        entries.insert(
            policy.id.clone(),
            CacheEntry {
                version: policy.version,
                compiled: compiled.clone(),
                inserted_at: Instant::now(),
                last_accessed_nanos: AtomicU64::new(nanos_since(self.epoch)),
            },
        );
        compiled
    }

    /// Drop expired entries; if none were expired, drop the least
    /// recently used one.
    fn evict(&self, entries: &mut HashMap<String, CacheEntry>) {
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(self.ttl));
        let mut evicted = before - entries.len();

        if evicted == 0 {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed_nanos.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());
            if let Some(id) = lru {
                entries.remove(&id);
                evicted = 1;
            }
        }

        let total = self.evictions.fetch_add(evicted as u64, Ordering::Relaxed) + evicted as u64;
        debug!(evicted, cache_evictions = total, "policy cache eviction");
    }

    /// Forget the compiled form of one policy.
    pub fn invalidate(&self, policy_id: &str) -> bool {
        self.entries.write().remove(policy_id).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

// src/cache.rs
use crate::types::AnalysisResult;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Hex blake3 digest of the exact source text.
pub fn fingerprint(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Arc<AnalysisResult>,
    computed_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(result: Arc<AnalysisResult>, ttl: Duration) -> Self {
        Self {
            result,
            computed_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.computed_at.elapsed() >= self.ttl
    }
}

#[derive(Debug)]
enum Slot {
    Ready(CacheEntry),
    /// A computation for this key is in flight.
    Pending,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Analyses actually run through `get_or_compute`.
    pub computations: u64,
    /// Callers that waited on another caller's in-flight computation.
    pub coalesced_waits: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    stats: CacheStats,
}

enum Lookup {
    Hit(Arc<AnalysisResult>),
    Expired,
    Pending,
    Absent,
}

impl CacheState {
    fn lookup(&self, key: &str) -> Lookup {
        match self.slots.get(key) {
            Some(Slot::Ready(entry)) if !entry.is_expired() => Lookup::Hit(Arc::clone(&entry.result)),
            Some(Slot::Ready(_)) => Lookup::Expired,
            Some(Slot::Pending) => Lookup::Pending,
            None => Lookup::Absent,
        }
    }

    fn evict(&mut self, key: &str) {
        self.slots.remove(key);
        self.stats.evictions += 1;
        trace!(key, "evicted expired entry");
    }
}

/// In-memory analysis cache with per-entry TTL and single-flight computation.
///
/// Expired entries are dropped lazily when looked up, or in bulk through
/// [`ResultCache::purge_expired`]. Only ready entries are ever removed by
/// `invalidate`/`clear`; an in-flight computation always lands its result.
#[derive(Debug, Default)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    ready: Condvar,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<AnalysisResult>> {
        let mut state = self.state.lock();
        match state.lookup(key) {
            Lookup::Hit(result) => {
                state.stats.hits += 1;
                debug!(key, "cache hit");
                Some(result)
            }
            Lookup::Expired => {
                state.evict(key);
                state.stats.misses += 1;
                None
            }
            Lookup::Pending | Lookup::Absent => {
                state.stats.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: &str, result: Arc<AnalysisResult>, ttl: Duration) {
        let mut state = self.state.lock();
        state
            .slots
            .insert(key.to_string(), Slot::Ready(CacheEntry::new(result, ttl)));
        drop(state);
        self.ready.notify_all();
    }

    /// Drops the ready entry under `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if matches!(state.slots.get(key), Some(Slot::Ready(_))) {
            state.slots.remove(key);
            debug!(key, "invalidated cache entry");
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|_, slot| matches!(slot, Slot::Pending));
        debug!(removed = before - state.slots.len(), "cleared cache");
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state
            .slots
            .retain(|_, slot| !matches!(slot, Slot::Ready(entry) if entry.is_expired()));
        let purged = before - state.slots.len();
        state.stats.evictions += purged as u64;
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state
                .slots
                .values()
                .filter(|slot| matches!(slot, Slot::Ready(_)))
                .count(),
            ..state.stats
        }
    }

    /// Returns the cached result for `key`, or runs `compute` and caches it.
    ///
    /// Concurrent callers for a key that is already being computed block until
    /// that computation finishes and share its result. If `compute` panics the
    /// pending slot is released and one of the waiters computes instead.
    pub fn get_or_compute<F>(&self, key: &str, ttl: Duration, compute: F) -> Arc<AnalysisResult>
    where
        F: FnOnce() -> AnalysisResult,
    {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            match state.lookup(key) {
                Lookup::Hit(result) => {
                    state.stats.hits += 1;
                    debug!(key, waited, "cache hit");
                    return result;
                }
                Lookup::Pending => {
                    if !waited {
                        state.stats.coalesced_waits += 1;
                        waited = true;
                        debug!(key, "waiting on in-flight analysis");
                    }
                    self.ready.wait(&mut state);
                }
                Lookup::Expired => {
                    state.evict(key);
                    break;
                }
                Lookup::Absent => break,
            }
        }

        state.stats.misses += 1;
        state.stats.computations += 1;
        state.slots.insert(key.to_string(), Slot::Pending);
        drop(state);

        let guard = PendingGuard {
            cache: self,
            key,
            armed: true,
        };
        debug!(key, "cache miss, computing");
        let result = Arc::new(compute());
        guard.complete(Arc::clone(&result), ttl);
        result
    }
}

/// Releases a pending slot if the computation unwinds before completing.
struct PendingGuard<'a> {
    cache: &'a ResultCache,
    key: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn complete(mut self, result: Arc<AnalysisResult>, ttl: Duration) {
        self.armed = false;
        self.cache.set(self.key, result, ttl);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.state.lock();
        if matches!(state.slots.get(self.key), Some(Slot::Pending)) {
            state.slots.remove(self.key);
        }
        drop(state);
        warn!(key = self.key, "analysis aborted, releasing pending slot");
        self.cache.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    fn result_with_total(total: u64) -> AnalysisResult {
        let mut result = AnalysisResult::empty();
        result.total_gas_cost = total;
        result.optimized_gas_cost = total;
        result
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_set_then_get() {
        let cache = ResultCache::new();
        assert!(cache.get("a").is_none());
        cache.set("a", Arc::new(result_with_total(7)), MINUTE);
        assert_eq!(cache.get("a").map(|r| r.total_gas_cost), Some(7));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[test]
    fn test_expired_entry_is_absent_and_evicted() {
        let cache = ResultCache::new();
        cache.set("a", Arc::new(result_with_total(1)), Duration::ZERO);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResultCache::new();
        cache.set("a", Arc::new(result_with_total(1)), MINUTE);
        cache.set("b", Arc::new(result_with_total(2)), MINUTE);
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.get("a").is_none());
        cache.clear();
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_purge_expired_keeps_live_entries() {
        let cache = ResultCache::new();
        cache.set("old", Arc::new(result_with_total(1)), Duration::ZERO);
        cache.set("new", Arc::new(result_with_total(2)), MINUTE);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_get_or_compute_runs_once_per_key() {
        let cache = ResultCache::new();
        let mut calls = 0;
        let first = cache.get_or_compute("k", MINUTE, || {
            calls += 1;
            result_with_total(5)
        });
        let second = cache.get_or_compute("k", MINUTE, || {
            calls += 1;
            result_with_total(6)
        });
        assert_eq!(calls, 1);
        assert_eq!(first, second);
        assert_eq!(cache.stats().computations, 1);
    }

    #[test]
    fn test_panicking_compute_releases_slot() {
        let cache = ResultCache::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            cache.get_or_compute("k", MINUTE, || panic!("scanner blew up"))
        }));
        assert!(outcome.is_err());

        let result = cache.get_or_compute("k", MINUTE, || result_with_total(9));
        assert_eq!(result.total_gas_cost, 9);
        assert_eq!(cache.stats().computations, 2);
    }

    #[test]
    fn test_fingerprint_changes_with_text() {
        assert_eq!(fingerprint("a"), fingerprint("a"));
        assert_ne!(fingerprint("a"), fingerprint("a "));
        assert_eq!(fingerprint("").len(), 64);
    }
}

//! Memory Cache - In-process Hot Tier
//!
//! Bounded key → value table with least-recently-used eviction on cost and
//! count, plus an optional non-owning weak table used to resurrect values that
//! were evicted while some other owner still holds them.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` covers the primary table, the weak table and
//!   the cost/count accounting; no I/O ever happens under it
//! - Recency is a monotonically increasing tick per entry, ordered in a
//!   `BTreeMap` so the oldest entry is always the first key
//! - A low-memory signal clears the primary table only

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::config::CacheConfig;
use super::value::{CacheValue, SharedValue};

/// Contract for a pluggable memory tier
pub trait MemoryCacheBackend: Send + Sync {
    /// Look up a value
    fn get(&self, key: &str) -> Option<SharedValue>;

    /// Insert a value with a cost; `None` removes the key
    fn set(&self, key: &str, value: Option<SharedValue>, cost: u64);

    /// Remove a value
    fn remove(&self, key: &str);

    /// Drop everything
    fn remove_all(&self);

    /// Presence check without promoting the entry
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// React to memory pressure
    fn handle_memory_warning(&self) {
        self.remove_all();
    }
}

struct Slot {
    value: SharedValue,
    cost: u64,
    tick: u64,
}

struct WeakSlot {
    value: Weak<CacheValue>,
    cost: u64,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Slot>,
    recency: BTreeMap<u64, String>,
    weak: HashMap<String, WeakSlot>,
    total_cost: u64,
    next_tick: u64,
}

impl MemoryInner {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, key: &str) -> Option<SharedValue> {
        let tick = self.tick();
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(Arc::clone(&slot.value))
    }

    fn insert(&mut self, key: &str, value: SharedValue, cost: u64) {
        self.remove(key);
        let tick = self.tick();
        self.recency.insert(tick, key.to_string());
        self.entries.insert(key.to_string(), Slot { value, cost, tick });
        self.total_cost = self.total_cost.saturating_add(cost);
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        self.total_cost = self.total_cost.saturating_sub(slot.cost);
        Some(slot)
    }

    fn over_limits(&self, max_cost: u64, max_count: u64) -> bool {
        (max_count > 0 && self.entries.len() as u64 > max_count)
            || (max_cost > 0 && self.total_cost > max_cost)
    }

    /// Evict least-recently-used entries until within bounds
    fn evict(&mut self, max_cost: u64, max_count: u64) -> u64 {
        let mut evicted = 0;
        while self.over_limits(max_cost, max_count) {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&key) {
                self.total_cost = self.total_cost.saturating_sub(slot.cost);
                evicted += 1;
            }
        }
        evicted
    }

    fn prune_weak(&mut self) {
        if self.weak.len() > self.entries.len() * 2 + 64 {
            self.weak.retain(|_, slot| slot.value.strong_count() > 0);
        }
    }
}

/// Memory cache - bounded in-process tier
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    max_cost: u64,
    max_count: u64,
    enabled: bool,
    use_weak: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    resurrections: AtomicU64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl MemoryCache {
    /// Create a memory cache from a configuration snapshot
    pub fn new(config: &CacheConfig) -> Self {
        let config = config.clone().normalized();
        Self {
            inner: Mutex::new(MemoryInner::default()),
            max_cost: config.max_memory_cost,
            max_count: config.max_memory_count,
            enabled: config.should_cache_in_memory,
            use_weak: config.should_use_weak_memory_cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            resurrections: AtomicU64::new(0),
        }
    }

    /// Total cost of entries in the primary table
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }

    /// Number of entries in the primary table
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True if the primary table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of weak mappings (live or dead)
    pub fn weak_len(&self) -> usize {
        self.inner.lock().weak.len()
    }

    /// True if weak resurrection is active
    pub fn uses_weak_cache(&self) -> bool {
        self.use_weak
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get resurrection count
    pub fn resurrections(&self) -> u64 {
        self.resurrections.load(Ordering::Relaxed)
    }

    /// Clear the primary table only; weak mappings survive.
    pub fn clear_primary(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.total_cost = 0;
        inner.weak.retain(|_, slot| slot.value.strong_count() > 0);
        debug!(weak = inner.weak.len(), "Memory tier primary table cleared");
    }

    fn record_evictions(&self, evicted: u64) {
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, "Memory tier evicted entries");
        }
    }
}

impl MemoryCacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<SharedValue> {
        if !self.enabled {
            return None;
        }

        let mut inner = self.inner.lock();
        if let Some(value) = inner.touch(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        if self.use_weak {
            let revived = inner
                .weak
                .get(key)
                .and_then(|slot| slot.value.upgrade().map(|value| (value, slot.cost)));
            match revived {
                Some((value, cost)) => {
                    inner.insert(key, Arc::clone(&value), cost);
                    let evicted = inner.evict(self.max_cost, self.max_count);
                    drop(inner);
                    self.record_evictions(evicted);
                    self.resurrections.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Memory tier resurrected entry from weak table");
                    return Some(value);
                }
                None => {
                    inner.weak.remove(key);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, key: &str, value: Option<SharedValue>, cost: u64) {
        let Some(value) = value else {
            self.remove(key);
            return;
        };
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock();
        if self.use_weak {
            inner.weak.insert(
                key.to_string(),
                WeakSlot {
                    value: Arc::downgrade(&value),
                    cost,
                },
            );
            inner.prune_weak();
        }
        inner.insert(key, value, cost);
        let evicted = inner.evict(self.max_cost, self.max_count);
        drop(inner);
        self.record_evictions(evicted);
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.remove(key);
        inner.weak.remove(key);
    }

    fn remove_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.weak.clear();
        inner.total_cost = 0;
    }

    fn contains(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let inner = self.inner.lock();
        inner.entries.contains_key(key)
            || (self.use_weak
                && inner
                    .weak
                    .get(key)
                    .is_some_and(|slot| slot.value.strong_count() > 0))
    }

    fn handle_memory_warning(&self) {
        self.clear_primary();
    }
}

/// Memory cache statistics
#[derive(Debug, Clone)]
pub struct MemoryStats {
    /// Entries in the primary table
    pub entries: usize,
    /// Total cost of the primary table
    pub total_cost: u64,
    /// Weak mappings
    pub weak_entries: usize,
    /// Hit count (including resurrections)
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Eviction count
    pub evictions: u64,
    /// Resurrection count
    pub resurrections: u64,
}

impl MemoryCache {
    /// Get cache statistics
    pub fn stats(&self) -> MemoryStats {
        let (entries, total_cost, weak_entries) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.total_cost, inner.weak.len())
        };
        MemoryStats {
            entries,
            total_cost,
            weak_entries,
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            resurrections: self.resurrections(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

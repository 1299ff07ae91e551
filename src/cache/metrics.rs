//! Cache Metrics Collection
//!
//! Per-facade counters for tier hits, fills and disk latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Memory tier
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,

    // Disk tier
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    preload_hits: AtomicU64,
    read_through_fills: AtomicU64,

    // Writes
    stores: AtomicU64,
    disk_writes: AtomicU64,
    removals: AtomicU64,

    // Disk latencies (microseconds, exponential moving average)
    disk_read_latency_us: AtomicU64,
    disk_write_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preload_hit(&self) {
        self.preload_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_through_fill(&self) {
        self.read_through_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn memory_misses(&self) -> u64 {
        self.memory_misses.load(Ordering::Relaxed)
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn disk_misses(&self) -> u64 {
        self.disk_misses.load(Ordering::Relaxed)
    }

    pub fn memory_hit_ratio(&self) -> f64 {
        let hits = self.memory_hits() as f64;
        let total = hits + self.memory_misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Hits at any tier over all lookups that reached a final answer
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.memory_hits()
            + self.disk_hits()
            + self.preload_hits.load(Ordering::Relaxed);
        // A disk miss is the final miss for a lookup that got that far
        let total = hits + self.disk_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_disk_read_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.disk_read_latency_us, duration);
    }

    pub fn record_disk_write_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.disk_write_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn disk_read_latency(&self) -> Duration {
        Duration::from_micros(self.disk_read_latency_us.load(Ordering::Relaxed))
    }

    pub fn disk_write_latency(&self) -> Duration {
        Duration::from_micros(self.disk_write_latency_us.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            memory_hits: self.memory_hits(),
            memory_misses: self.memory_misses(),
            memory_hit_ratio: self.memory_hit_ratio(),
            disk_hits: self.disk_hits(),
            disk_misses: self.disk_misses(),
            preload_hits: self.preload_hits.load(Ordering::Relaxed),
            read_through_fills: self.read_through_fills.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            disk_read_latency_us: self.disk_read_latency().as_micros() as u64,
            disk_write_latency_us: self.disk_write_latency().as_micros() as u64,
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.memory_hits,
            &self.memory_misses,
            &self.disk_hits,
            &self.disk_misses,
            &self.preload_hits,
            &self.read_through_fills,
            &self.stores,
            &self.disk_writes,
            &self.removals,
            &self.disk_read_latency_us,
            &self.disk_write_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    // Memory
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_hit_ratio: f64,

    // Disk
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub preload_hits: u64,
    pub read_through_fills: u64,

    // Writes
    pub stores: u64,
    pub disk_writes: u64,
    pub removals: u64,

    // Latency
    pub disk_read_latency_us: u64,
    pub disk_write_latency_us: u64,

    // Overall
    pub overall_hit_ratio: f64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

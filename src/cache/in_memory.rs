//! In-memory disk tier
//!
//! Implements `DiskCacheBackend` over a `DashMap` for tests and ephemeral
//! caches. Counts reads, writes and deletes so callers can check whether the
//! disk tier was touched at all.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;

use super::config::CacheConfig;
use super::disk::{cache_file_name, DiskCacheBackend};
use super::trim::{plan_trim, TrimCandidate};

#[derive(Clone)]
struct Record {
    data: Bytes,
    extended: Option<Vec<u8>>,
    stamp: SystemTime,
}

/// Disk tier held in process memory
pub struct InMemoryDiskCache {
    records: DashMap<String, Record>,
    config: CacheConfig,
    root: PathBuf,
    read_delay: Option<Duration>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryDiskCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl InMemoryDiskCache {
    /// Create an empty store
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            records: DashMap::new(),
            config: config.clone(),
            root: PathBuf::from("in-memory"),
            read_delay: None,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Sleep this long on every read
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Override an entry's timestamp
    pub fn set_timestamp(&self, key: &str, stamp: SystemTime) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.stamp = stamp;
        }
    }

    /// Read operations (get and contains)
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write operations
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Delete operations
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }
}

impl DiskCacheBackend for InMemoryDiskCache {
    fn contains(&self, key: &str) -> bool {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.records.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        self.records.get(key).map(|record| record.data.clone())
    }

    fn set(&self, key: &str, data: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let data = Bytes::copy_from_slice(data);
        let stamp = SystemTime::now();
        self.records
            .entry(key.to_string())
            .and_modify(|record| {
                record.data = data.clone();
                record.stamp = stamp;
            })
            .or_insert_with(|| Record {
                data,
                extended: None,
                stamp,
            });
    }

    fn get_extended(&self, key: &str) -> Option<Vec<u8>> {
        self.records.get(key).and_then(|record| record.extended.clone())
    }

    fn set_extended(&self, key: &str, data: Option<&[u8]>) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.extended = data.map(<[u8]>::to_vec);
        }
    }

    fn remove(&self, key: &str) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.records.remove(key);
    }

    fn remove_all(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.records.clear();
    }

    fn remove_expired(&self) {
        let candidates: Vec<_> = self
            .records
            .iter()
            .map(|entry| {
                TrimCandidate::new(entry.key().clone(), entry.stamp, entry.data.len() as u64)
            })
            .collect();
        let plan = plan_trim(
            candidates,
            self.config.expiration_cutoff(SystemTime::now()),
            self.config.max_disk_size,
        );
        for key in plan.removals() {
            self.remove(key);
        }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.root.join(cache_file_name(key))
    }

    fn total_count(&self) -> u64 {
        self.records.len() as u64
    }

    fn total_size(&self) -> u64 {
        self.records
            .iter()
            .map(|entry| entry.data.len() as u64)
            .sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

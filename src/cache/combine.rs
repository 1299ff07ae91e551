//! Cache Combine - Memory + Disk Facade
//!
//! Owns one memory tier and one disk tier and implements the unified
//! backend contract over them:
//!
//! - **query**: memory first, then disk on the serial queue (read-through
//!   into memory), then the optional read-only preload resolver
//! - **store**: memory synchronously, disk enqueued
//! - **remove / clear**: memory synchronously, disk enqueued
//! - **contains**: memory locally, disk on the queue; never fills memory
//!
//! A read queued before a store, remove or clear of the same key still
//! reports what it found but does not fill memory.
//!
//! All disk work for one facade runs on its own `SerialQueue`. Deferred
//! completions run on the process-wide callback queue.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::backend::{
    CacheBackend, CacheSize, ContainsCompletion, DoneCompletion, QueryCompletion, QueryContext,
    QueryOptions, SizeCompletion, StoreOptions,
};
use super::config::CacheConfig;
use super::disk::{move_cache_directory, DiskCache, DiskCacheBackend};
use super::fence::{FillFence, FillTicket};
use super::lifecycle::{LifecycleEvent, LifecycleObserver};
use super::memory::{MemoryCache, MemoryCacheBackend};
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::queue::{dispatch_callback, SerialQueue};
use super::task::AsyncTask;
use super::value::{CacheType, CacheValue, SharedValue};
use crate::error::{Error, Result};

/// Read-only fallback location for a key, consulted after a disk miss
pub type PreloadResolver = Arc<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

/// Namespace used by `CacheCombine::default_cache`
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default parent directory for cache roots.
///
/// `$XDG_CACHE_HOME/blobtier`, else `$HOME/.cache/blobtier`, else `{temp}/blobtier`.
pub fn default_cache_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME").filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir).join("blobtier");
    }
    if let Some(home) = std::env::var_os("HOME").filter(|home| !home.is_empty()) {
        return PathBuf::from(home).join(".cache").join("blobtier");
    }
    std::env::temp_dir().join("blobtier")
}

/// Handles shared with jobs running on the disk queue
#[derive(Clone)]
struct Tiers {
    memory: Arc<dyn MemoryCacheBackend>,
    disk: Option<Arc<dyn DiskCacheBackend>>,
    preload: Option<PreloadResolver>,
    metrics: Arc<CacheMetrics>,
    fence: Arc<FillFence>,
    cache_in_memory: bool,
}

impl Tiers {
    fn fill_memory(&self, key: &str, value: &SharedValue, cost: u64, ticket: &FillTicket) {
        if !self.cache_in_memory {
            return;
        }
        let filled = ticket.fill(|| {
            self.memory.set(key, Some(Arc::clone(value)), cost);
        });
        if filled {
            self.metrics.record_read_through_fill();
        } else {
            debug!(key, "Key changed while reading, skipping memory fill");
        }
    }

    /// Take a fill ticket on the calling thread, before the read is queued
    fn begin_read(&self, key: &str) -> FillTicket {
        self.fence.begin(key)
    }

    /// Disk lookup with read-through, falling back to an earlier memory hit,
    /// then to the preload resolver.
    fn read_disk(
        &self,
        key: &str,
        memory_hit: Option<SharedValue>,
        ticket: &FillTicket,
    ) -> (Option<SharedValue>, CacheType) {
        if let Some(disk) = &self.disk {
            let tracker = LatencyTracker::start();
            let data = disk.get(key);
            self.metrics.record_disk_read_latency(tracker.elapsed());

            if let Some(data) = data {
                self.metrics.record_disk_hit();
                let cost = data.len() as u64;
                let value = Arc::new(CacheValue::decode(data));
                self.fill_memory(key, &value, cost, ticket);
                return (Some(value), CacheType::Disk);
            }
            self.metrics.record_disk_miss();
        }

        if let Some(value) = memory_hit {
            return (Some(value), CacheType::Memory);
        }

        self.read_preload(key, ticket)
            .map_or((None, CacheType::None), |value| {
                (Some(value), CacheType::Disk)
            })
    }

    fn read_preload(&self, key: &str, ticket: &FillTicket) -> Option<SharedValue> {
        let resolver = self.preload.as_ref()?;
        let path = resolver(key)?;
        match fs::read(&path) {
            Ok(data) => {
                self.metrics.record_preload_hit();
                let cost = data.len() as u64;
                let value = Arc::new(CacheValue::decode(data.into()));
                self.fill_memory(key, &value, cost, ticket);
                debug!(key, path = %path.display(), "Preload hit");
                Some(value)
            }
            Err(e) => {
                debug!(key, path = %path.display(), error = %e, "Preload path unreadable");
                None
            }
        }
    }
}

/// Run `completion` through `task`, inline or on the callback queue
fn deliver<F>(task: &AsyncTask, sync: bool, completion: F)
where
    F: FnOnce() + Send + 'static,
{
    if sync {
        task.complete(completion);
    } else {
        let task = task.clone();
        dispatch_callback(move || {
            task.complete(completion);
        });
    }
}

/// Memory + disk cache facade
pub struct CacheCombine {
    namespace: String,
    disk_root: PathBuf,
    config: CacheConfig,
    tiers: Tiers,
    queue: SerialQueue,
}

impl CacheCombine {
    /// Start building a cache for `namespace`
    pub fn builder(namespace: impl Into<String>) -> CacheCombineBuilder {
        CacheCombineBuilder::new(namespace)
    }

    /// Cache under the default namespace and directory
    pub fn default_cache() -> Self {
        Self::builder(DEFAULT_NAMESPACE).build()
    }

    /// Namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Disk root (`{directory}/{namespace}`)
    pub fn disk_root(&self) -> &Path {
        &self.disk_root
    }

    /// Configuration snapshot
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// True if the disk tier is available
    pub fn has_disk(&self) -> bool {
        self.tiers.disk.is_some()
    }

    /// Fail with `Error::NoDiskTier` when the disk tier is unavailable
    pub fn require_disk(&self) -> Result<()> {
        if self.has_disk() {
            Ok(())
        } else {
            Err(Error::NoDiskTier)
        }
    }

    /// Memory tier
    pub fn memory_cache(&self) -> &Arc<dyn MemoryCacheBackend> {
        &self.tiers.memory
    }

    /// Disk tier
    pub fn disk_cache(&self) -> Option<&Arc<dyn DiskCacheBackend>> {
        self.tiers.disk.as_ref()
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.tiers.metrics.snapshot()
    }

    /// Block until every disk job queued so far has run
    pub fn wait_for_pending_io(&self) {
        self.queue.flush();
    }

    // -------------------------------------------------------------------------
    // Memory conveniences
    // -------------------------------------------------------------------------

    /// Memory lookup
    pub fn memory_value(&self, key: &str) -> Option<SharedValue> {
        if !self.config.should_cache_in_memory || key.is_empty() {
            return None;
        }
        let value = self.tiers.memory.get(key);
        if value.is_some() {
            self.tiers.metrics.record_memory_hit();
        } else {
            self.tiers.metrics.record_memory_miss();
        }
        value
    }

    /// Store into memory only
    pub fn store_to_memory(&self, value: SharedValue, key: &str) {
        if !self.config.should_cache_in_memory || key.is_empty() {
            return;
        }
        let cost = value.encode().map_or(0, |data| data.len() as u64);
        self.tiers.fence.bump(key);
        self.tiers.memory.set(key, Some(value), cost);
    }

    /// Clear the memory tier
    pub fn clear_memory(&self) {
        self.tiers.fence.bump_all();
        self.tiers.memory.remove_all();
    }

    // -------------------------------------------------------------------------
    // Disk conveniences (block on the serial queue)
    // -------------------------------------------------------------------------

    /// Disk lookup with read-through into memory
    pub fn disk_value(&self, key: &str) -> Option<SharedValue> {
        if key.is_empty() {
            return None;
        }
        let tiers = self.tiers.clone();
        let ticket = tiers.begin_read(key);
        let key = key.to_string();
        self.queue
            .dispatch_sync(move || tiers.read_disk(&key, None, &ticket).0)
            .flatten()
    }

    /// Memory, then disk
    pub fn value(&self, key: &str) -> Option<SharedValue> {
        self.memory_value(key).or_else(|| self.disk_value(key))
    }

    /// Write raw bytes to disk and wait for the write
    pub fn store_to_disk(&self, data: &[u8], key: &str) {
        let Some(disk) = self.tiers.disk.clone() else {
            return;
        };
        if key.is_empty() {
            return;
        }
        self.tiers.fence.bump(key);
        let metrics = Arc::clone(&self.tiers.metrics);
        let key = key.to_string();
        let data = data.to_vec();
        self.queue.dispatch_sync(move || {
            let tracker = LatencyTracker::start();
            disk.set(&key, &data);
            metrics.record_disk_write_latency(tracker.elapsed());
            metrics.record_disk_write();
        });
    }

    /// Read side-channel metadata for `key`
    pub fn extended_data(&self, key: &str) -> Option<Vec<u8>> {
        let disk = self.tiers.disk.clone()?;
        let key = key.to_string();
        self.queue
            .dispatch_sync(move || disk.get_extended(&key))
            .flatten()
    }

    /// Write side-channel metadata for `key`; `None` deletes it
    pub fn store_extended_data(&self, key: &str, data: Option<Vec<u8>>) {
        let Some(disk) = self.tiers.disk.clone() else {
            return;
        };
        let key = key.to_string();
        self.queue
            .dispatch_sync(move || disk.set_extended(&key, data.as_deref()));
    }

    /// Blocking disk presence check
    pub fn disk_exists(&self, key: &str) -> bool {
        let Some(disk) = self.tiers.disk.clone() else {
            return false;
        };
        let key = key.to_string();
        self.queue
            .dispatch_sync(move || disk.contains(&key))
            .unwrap_or(false)
    }

    /// Disk presence check delivered on the callback queue
    pub fn disk_exists_async<F>(&self, key: &str, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let Some(disk) = self.tiers.disk.clone() else {
            dispatch_callback(move || completion(false));
            return;
        };
        let key = key.to_string();
        self.queue.dispatch(move || {
            let exists = disk.contains(&key);
            dispatch_callback(move || completion(exists));
        });
    }

    /// Path the disk tier uses for `key`
    pub fn cache_path_for_key(&self, key: &str) -> Option<PathBuf> {
        self.tiers.disk.as_ref().map(|disk| disk.path_for_key(key))
    }

    /// Wipe the disk tier; the completion fires once the wipe is queued
    pub fn clear_disk(&self, completion: Option<DoneCompletion>) {
        self.tiers.fence.bump_all();
        if let Some(disk) = self.tiers.disk.clone() {
            self.queue.dispatch(move || disk.remove_all());
        }
        if let Some(completion) = completion {
            completion();
        }
    }

    /// Trim the disk tier; the completion fires once the trim is queued
    pub fn remove_expired(&self, completion: Option<DoneCompletion>) {
        if let Some(disk) = self.tiers.disk.clone() {
            self.queue.dispatch(move || disk.remove_expired());
        }
        if let Some(completion) = completion {
            completion();
        }
    }

    /// Bytes on disk
    pub fn total_disk_size(&self) -> u64 {
        let Some(disk) = self.tiers.disk.clone() else {
            return 0;
        };
        self.queue
            .dispatch_sync(move || disk.total_size())
            .unwrap_or(0)
    }

    /// Entries on disk
    pub fn total_disk_count(&self) -> u64 {
        let Some(disk) = self.tiers.disk.clone() else {
            return 0;
        };
        self.queue
            .dispatch_sync(move || disk.total_count())
            .unwrap_or(0)
    }
}

impl CacheBackend for CacheCombine {
    fn query(
        &self,
        key: &str,
        options: QueryOptions,
        context: &QueryContext,
        completion: QueryCompletion,
    ) -> AsyncTask {
        let scope = context.query_cache_type;
        if key.is_empty() || scope.is_none() {
            completion(None, CacheType::None);
            return AsyncTask::completed();
        }

        let task = AsyncTask::new();

        let memory_hit = if scope.includes_memory() {
            self.memory_value(key)
        } else {
            None
        };

        let consult_disk = scope.includes_disk()
            && (memory_hit.is_none() || options.continue_after_memory_hit);

        if !consult_disk {
            let tier = if memory_hit.is_some() {
                CacheType::Memory
            } else {
                CacheType::None
            };
            deliver(&task, options.sync_memory_completion, move || {
                completion(memory_hit, tier)
            });
            return task;
        }

        let tiers = self.tiers.clone();
        let ticket = tiers.begin_read(key);
        let key = key.to_string();

        if options.sync_disk {
            let (value, tier) = self
                .queue
                .dispatch_sync(move || tiers.read_disk(&key, memory_hit, &ticket))
                .unwrap_or((None, CacheType::None));
            task.complete(move || completion(value, tier));
        } else {
            let job_task = task.clone();
            self.queue.dispatch(move || {
                // Canceled before the read started: skip the I/O entirely
                if job_task.is_cancelled() {
                    return;
                }
                let (value, tier) = tiers.read_disk(&key, memory_hit, &ticket);
                deliver(&job_task, false, move || completion(value, tier));
            });
        }
        task
    }

    fn store(
        &self,
        value: Option<SharedValue>,
        key: &str,
        options: StoreOptions,
        completion: Option<DoneCompletion>,
    ) {
        let complete = move || {
            if let Some(completion) = completion {
                completion();
            }
        };

        let Some(value) = value.filter(|_| !key.is_empty()) else {
            complete();
            return;
        };

        self.tiers.metrics.record_store();
        self.tiers.fence.bump(key);
        let encoded = value.encode();

        if self.config.should_cache_in_memory {
            let cost = encoded.as_ref().map_or(0, |data| data.len() as u64);
            self.tiers.memory.set(key, Some(value), cost);
        }

        let disk_write = match (options.to_disk, encoded, self.tiers.disk.clone()) {
            (true, Some(data), Some(disk)) => Some((data, disk)),
            (true, None, _) => {
                debug!(key, "Value has no byte form, cached in memory only");
                None
            }
            _ => None,
        };

        if let Some((data, disk)) = disk_write {
            let metrics = Arc::clone(&self.tiers.metrics);
            let key = key.to_string();
            let job = move || {
                let tracker = LatencyTracker::start();
                disk.set(&key, &data);
                metrics.record_disk_write_latency(tracker.elapsed());
                metrics.record_disk_write();
            };
            if options.wait_for_disk {
                self.queue.dispatch_sync(job);
            } else {
                self.queue.dispatch(job);
            }
        }

        complete();
    }

    fn remove(&self, key: &str, scope: CacheType, completion: Option<DoneCompletion>) {
        if key.is_empty() {
            if let Some(completion) = completion {
                completion();
            }
            return;
        }

        self.tiers.metrics.record_removal();
        self.tiers.fence.bump(key);
        if scope.includes_memory() {
            self.tiers.memory.remove(key);
        }

        match self.tiers.disk.clone().filter(|_| scope.includes_disk()) {
            Some(disk) => {
                let key = key.to_string();
                self.queue.dispatch(move || {
                    disk.remove(&key);
                    if let Some(completion) = completion {
                        dispatch_callback(completion);
                    }
                });
            }
            None => {
                if let Some(completion) = completion {
                    completion();
                }
            }
        }
    }

    fn contains(&self, key: &str, scope: CacheType, completion: ContainsCompletion) {
        if key.is_empty() {
            completion(CacheType::None);
            return;
        }

        if scope.includes_memory()
            && self.config.should_cache_in_memory
            && self.tiers.memory.contains(key)
        {
            completion(CacheType::Memory);
            return;
        }

        match self.tiers.disk.clone().filter(|_| scope.includes_disk()) {
            Some(disk) => {
                let key = key.to_string();
                self.queue.dispatch(move || {
                    let tier = if disk.contains(&key) {
                        CacheType::Disk
                    } else {
                        CacheType::None
                    };
                    dispatch_callback(move || completion(tier));
                });
            }
            None => completion(CacheType::None),
        }
    }

    fn clear(&self, scope: CacheType, completion: Option<DoneCompletion>) {
        if scope.includes_memory() {
            self.clear_memory();
        }
        if scope.includes_disk() {
            self.clear_disk(None);
        }
        if let Some(completion) = completion {
            completion();
        }
    }

    fn calculate_size(&self, completion: SizeCompletion) {
        let Some(disk) = self.tiers.disk.clone() else {
            completion(CacheSize::default());
            return;
        };
        self.queue.dispatch(move || {
            let size = CacheSize {
                file_count: disk.total_count(),
                total_size: disk.total_size(),
            };
            dispatch_callback(move || completion(size));
        });
    }
}

impl LifecycleObserver for CacheCombine {
    fn on_lifecycle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::MemoryWarning => {
                debug!(namespace = %self.namespace, "Memory warning, clearing memory tier");
                self.tiers.memory.handle_memory_warning();
            }
            LifecycleEvent::EnterBackground => {
                if self.config.should_remove_expired_data_when_enter_background {
                    debug!(namespace = %self.namespace, "Background, trimming disk tier");
                    self.remove_expired(None);
                }
            }
        }
    }
}

impl std::fmt::Debug for CacheCombine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCombine")
            .field("namespace", &self.namespace)
            .field("disk_root", &self.disk_root)
            .field("has_disk", &self.has_disk())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for `CacheCombine`
pub struct CacheCombineBuilder {
    namespace: String,
    directory: Option<PathBuf>,
    config: CacheConfig,
    memory: Option<Arc<dyn MemoryCacheBackend>>,
    disk: Option<Arc<dyn DiskCacheBackend>>,
    preload: Option<PreloadResolver>,
    migrate_from: Option<PathBuf>,
}

impl CacheCombineBuilder {
    fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            directory: None,
            config: CacheConfig::default(),
            memory: None,
            disk: None,
            preload: None,
            migrate_from: None,
        }
    }

    /// Parent directory; the disk root is `{directory}/{namespace}`
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Configuration (copied into the cache)
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a memory tier
    pub fn memory_cache(mut self, memory: Arc<dyn MemoryCacheBackend>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Inject a disk tier
    pub fn disk_cache(mut self, disk: Arc<dyn DiskCacheBackend>) -> Self {
        self.disk = Some(disk);
        self
    }

    /// Read-only fallback consulted after a disk miss
    pub fn preload_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.preload = Some(Arc::new(resolver));
        self
    }

    /// Move an older cache root into place before opening the disk tier
    pub fn migrate_from(mut self, old_root: impl Into<PathBuf>) -> Self {
        self.migrate_from = Some(old_root.into());
        self
    }

    /// Build the cache. A disk directory that cannot be created leaves the
    /// cache without a disk tier.
    pub fn build(self) -> CacheCombine {
        let config = self.config.normalized();
        let directory = self.directory.unwrap_or_else(default_cache_directory);
        let disk_root = directory.join(&self.namespace);

        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(MemoryCache::new(&config)));

        let disk = match self.disk {
            Some(disk) => Some(disk),
            None => {
                if let Some(old_root) = &self.migrate_from {
                    if let Err(e) = move_cache_directory(old_root, &disk_root) {
                        warn!(error = %e, "Cache directory migration failed");
                    }
                }
                match DiskCache::new(&disk_root, &config) {
                    Ok(disk) => Some(Arc::new(disk) as Arc<dyn DiskCacheBackend>),
                    Err(e) => {
                        warn!(error = %e, "Disk tier unavailable, caching in memory only");
                        None
                    }
                }
            }
        };

        info!(
            namespace = %self.namespace,
            path = %disk_root.display(),
            disk = disk.is_some(),
            "Cache opened"
        );

        CacheCombine {
            queue: SerialQueue::new(format!("blobtier-io-{}", self.namespace)),
            tiers: Tiers {
                memory,
                disk,
                preload: self.preload,
                metrics: Arc::new(CacheMetrics::new()),
                fence: Arc::new(FillFence::default()),
                cache_in_memory: config.should_cache_in_memory,
            },
            namespace: self.namespace,
            disk_root,
            config,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

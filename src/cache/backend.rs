//! Unified Cache Backend Contract
//!
//! Every composite cache (a `CacheCombine`, a `CachesManager`, or a custom
//! implementation) exposes the same five callback-style operations. The
//! `CacheBackendExt` adapter turns each of them into a future.

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::task::AsyncTask;
use super::value::{CacheType, SharedValue};

/// Completion for `query`: the value (if any) and the tier that produced it
pub type QueryCompletion = Box<dyn FnOnce(Option<SharedValue>, CacheType) + Send + 'static>;

/// Completion for `store`, `remove` and `clear`
pub type DoneCompletion = Box<dyn FnOnce() + Send + 'static>;

/// Completion for `contains`: the tier that matched, `CacheType::None` on a miss
pub type ContainsCompletion = Box<dyn FnOnce(CacheType) + Send + 'static>;

/// Completion for `calculate_size`
pub type SizeCompletion = Box<dyn FnOnce(CacheSize) + Send + 'static>;

/// Query knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Consult disk even after a memory hit
    pub continue_after_memory_hit: bool,
    /// Deliver a memory hit on the calling thread instead of deferring it
    pub sync_memory_completion: bool,
    /// Block the caller on disk access
    pub sync_disk: bool,
}

impl QueryOptions {
    pub fn continue_after_memory_hit(mut self) -> Self {
        self.continue_after_memory_hit = true;
        self
    }

    pub fn sync_memory_completion(mut self) -> Self {
        self.sync_memory_completion = true;
        self
    }

    pub fn sync_disk(mut self) -> Self {
        self.sync_disk = true;
        self
    }

    /// Everything synchronous
    pub fn blocking() -> Self {
        Self::default().sync_memory_completion().sync_disk()
    }
}

/// Per-query context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryContext {
    /// Tiers the query may consult
    pub query_cache_type: CacheType,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            query_cache_type: CacheType::All,
        }
    }
}

impl QueryContext {
    /// Restrict the query to `scope`
    pub fn scoped(scope: CacheType) -> Self {
        Self {
            query_cache_type: scope,
        }
    }
}

/// Store knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Also persist to the disk tier
    pub to_disk: bool,
    /// Fire the completion only once the disk write has landed
    pub wait_for_disk: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            to_disk: true,
            wait_for_disk: false,
        }
    }
}

impl StoreOptions {
    /// Memory only
    pub fn memory_only() -> Self {
        Self {
            to_disk: false,
            wait_for_disk: false,
        }
    }

    /// Memory and disk, completing after the disk write
    pub fn wait_for_disk() -> Self {
        Self {
            to_disk: true,
            wait_for_disk: true,
        }
    }
}

/// Disk footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheSize {
    /// Stored entries
    pub file_count: u64,
    /// Stored bytes
    pub total_size: u64,
}

impl std::ops::Add for CacheSize {
    type Output = CacheSize;

    fn add(self, other: CacheSize) -> CacheSize {
        CacheSize {
            file_count: self.file_count + other.file_count,
            total_size: self.total_size + other.total_size,
        }
    }
}

/// Composite cache contract
pub trait CacheBackend: Send + Sync {
    /// Look up `key`. The completion runs at most once and never after the
    /// returned task is canceled.
    fn query(
        &self,
        key: &str,
        options: QueryOptions,
        context: &QueryContext,
        completion: QueryCompletion,
    ) -> AsyncTask;

    /// Store `value` for `key`. A `None` value or empty key only fires the completion.
    fn store(
        &self,
        value: Option<SharedValue>,
        key: &str,
        options: StoreOptions,
        completion: Option<DoneCompletion>,
    );

    /// Remove `key` from the tiers in `scope`
    fn remove(&self, key: &str, scope: CacheType, completion: Option<DoneCompletion>);

    /// Report which tier in `scope` holds `key`
    fn contains(&self, key: &str, scope: CacheType, completion: ContainsCompletion);

    /// Clear the tiers in `scope`
    fn clear(&self, scope: CacheType, completion: Option<DoneCompletion>);

    /// Disk footprint; backends without a disk tier report zero
    fn calculate_size(&self, completion: SizeCompletion) {
        completion(CacheSize::default());
    }
}

/// Cancels the wrapped task when dropped (no-op once it completed)
struct CancelOnDrop(AsyncTask);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Future-returning view of any `CacheBackend`
#[async_trait]
pub trait CacheBackendExt: CacheBackend {
    /// Query and await the result. Dropping the future cancels the query.
    async fn query_async(
        &self,
        key: &str,
        options: QueryOptions,
        context: QueryContext,
    ) -> (Option<SharedValue>, CacheType);

    /// Store and await the completion
    async fn store_async(&self, value: SharedValue, key: &str, options: StoreOptions);

    /// Remove and await the completion
    async fn remove_async(&self, key: &str, scope: CacheType);

    /// Check presence
    async fn contains_async(&self, key: &str, scope: CacheType) -> CacheType;

    /// Clear and await the completion
    async fn clear_async(&self, scope: CacheType);

    /// Disk footprint
    async fn calculate_size_async(&self) -> CacheSize;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackendExt for T {
    async fn query_async(
        &self,
        key: &str,
        options: QueryOptions,
        context: QueryContext,
    ) -> (Option<SharedValue>, CacheType) {
        let (tx, rx) = oneshot::channel();
        let task = self.query(
            key,
            options,
            &context,
            Box::new(move |value, tier| {
                let _ = tx.send((value, tier));
            }),
        );
        let _guard = CancelOnDrop(task);
        rx.await.unwrap_or((None, CacheType::None))
    }

    async fn store_async(&self, value: SharedValue, key: &str, options: StoreOptions) {
        let (tx, rx) = oneshot::channel();
        self.store(
            Some(value),
            key,
            options,
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        let _ = rx.await;
    }

    async fn remove_async(&self, key: &str, scope: CacheType) {
        let (tx, rx) = oneshot::channel();
        self.remove(
            key,
            scope,
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        let _ = rx.await;
    }

    async fn contains_async(&self, key: &str, scope: CacheType) -> CacheType {
        let (tx, rx) = oneshot::channel();
        self.contains(
            key,
            scope,
            Box::new(move |tier| {
                let _ = tx.send(tier);
            }),
        );
        rx.await.unwrap_or(CacheType::None)
    }

    async fn clear_async(&self, scope: CacheType) {
        let (tx, rx) = oneshot::channel();
        self.clear(
            scope,
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        let _ = rx.await;
    }

    async fn calculate_size_async(&self) -> CacheSize {
        let (tx, rx) = oneshot::channel();
        self.calculate_size(Box::new(move |size| {
            let _ = tx.send(size);
        }));
        rx.await.unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

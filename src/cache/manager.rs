//! Caches Manager - Multi-backend Fan-out
//!
//! Ordered list of independent cache backends; the last one has the highest
//! priority. Each operation kind is distributed according to its own
//! `OperationPolicy`. A miss at one backend never aborts the fan-out, and the
//! manager itself implements `CacheBackend`, so managers nest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::backend::{
    CacheBackend, CacheSize, ContainsCompletion, DoneCompletion, QueryCompletion, QueryContext,
    QueryOptions, SizeCompletion, StoreOptions,
};
use super::policy::{ManagerPolicies, OperationPolicy};
use super::task::AsyncTask;
use super::value::{CacheType, SharedValue};

type Backend = Arc<dyn CacheBackend>;
type Backends = Arc<Vec<Backend>>;
type DoneOp = Arc<dyn Fn(&Backend, DoneCompletion) + Send + Sync>;

/// Countdown that runs `done` when the last of `count` reports arrive
struct FanOut {
    pending: AtomicUsize,
    done: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FanOut {
    fn new<F>(count: usize, done: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self {
            pending: AtomicUsize::new(count),
            done: Mutex::new(Some(Box::new(done))),
        })
    }

    fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let done = self.done.lock().take();
            if let Some(done) = done {
                done();
            }
        }
    }
}

fn finish(completion: Option<DoneCompletion>) {
    if let Some(completion) = completion {
        completion();
    }
}

/// Multi-backend cache manager
pub struct CachesManager {
    caches: RwLock<Vec<Backend>>,
    policies: RwLock<ManagerPolicies>,
}

impl Default for CachesManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CachesManager {
    /// Empty manager with default policies
    pub fn new() -> Self {
        Self::with_policies(ManagerPolicies::default())
    }

    /// Empty manager with explicit policies
    pub fn with_policies(policies: ManagerPolicies) -> Self {
        Self {
            caches: RwLock::new(Vec::new()),
            policies: RwLock::new(policies),
        }
    }

    /// Append a backend; it becomes the highest priority
    pub fn add_cache(&self, cache: Backend) {
        self.caches.write().push(cache);
    }

    /// Remove a backend by identity
    pub fn remove_cache(&self, cache: &Backend) -> bool {
        let mut caches = self.caches.write();
        let before = caches.len();
        caches.retain(|existing| !Arc::ptr_eq(existing, cache));
        caches.len() != before
    }

    /// Snapshot of the backends, lowest priority first
    pub fn caches(&self) -> Vec<Backend> {
        self.caches.read().clone()
    }

    /// Number of backends
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// True if no backends are registered
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Current policies
    pub fn policies(&self) -> ManagerPolicies {
        *self.policies.read()
    }

    pub fn set_policies(&self, policies: ManagerPolicies) {
        *self.policies.write() = policies;
    }

    pub fn set_query_policy(&self, policy: OperationPolicy) {
        self.policies.write().query = policy;
    }

    pub fn set_store_policy(&self, policy: OperationPolicy) {
        self.policies.write().store = policy;
    }

    pub fn set_remove_policy(&self, policy: OperationPolicy) {
        self.policies.write().remove = policy;
    }

    pub fn set_contains_policy(&self, policy: OperationPolicy) {
        self.policies.write().contains = policy;
    }

    pub fn set_clear_policy(&self, policy: OperationPolicy) {
        self.policies.write().clear = policy;
    }

    fn snapshot(&self) -> Backends {
        Arc::new(self.caches.read().clone())
    }

    /// Run a completion-style operation under `policy`
    fn fan_out_done(&self, policy: OperationPolicy, op: DoneOp, completion: Option<DoneCompletion>) {
        let caches = self.snapshot();
        if caches.is_empty() {
            finish(completion);
            return;
        }

        match policy {
            OperationPolicy::HighestOnly | OperationPolicy::LowestOnly => {
                let target = if policy == OperationPolicy::HighestOnly {
                    caches.last()
                } else {
                    caches.first()
                };
                match target {
                    Some(cache) => op(cache, Box::new(move || finish(completion))),
                    None => finish(completion),
                }
            }
            OperationPolicy::Concurrent => {
                let fan_out = FanOut::new(caches.len(), move || finish(completion));
                for cache in caches.iter() {
                    let fan_out = Arc::clone(&fan_out);
                    op(cache, Box::new(move || fan_out.complete_one()));
                }
            }
            OperationPolicy::Serial => serial_done(caches.clone(), caches.len(), op, completion),
        }
    }
}

/// Run `op` on `caches[remaining - 1]`, then on the next lower one
fn serial_done(caches: Backends, remaining: usize, op: DoneOp, completion: Option<DoneCompletion>) {
    if remaining == 0 {
        finish(completion);
        return;
    }
    let cache = Arc::clone(&caches[remaining - 1]);
    let next_op = Arc::clone(&op);
    op(
        &cache,
        Box::new(move || serial_done(caches, remaining - 1, next_op, completion)),
    );
}

fn serial_query(
    caches: Backends,
    remaining: usize,
    key: String,
    options: QueryOptions,
    context: QueryContext,
    parent: AsyncTask,
    completion: QueryCompletion,
) {
    if parent.is_cancelled() {
        return;
    }
    if remaining == 0 {
        parent.complete(move || completion(None, CacheType::None));
        return;
    }

    let cache = Arc::clone(&caches[remaining - 1]);
    let next_parent = parent.clone();
    let next_key = key.clone();
    let child = cache.query(
        &key,
        options,
        &context,
        Box::new(move |value, tier| {
            if value.is_some() {
                debug!(backend = remaining - 1, %tier, "Serial query hit");
                next_parent.complete(move || completion(value, tier));
            } else {
                serial_query(
                    caches,
                    remaining - 1,
                    next_key,
                    options,
                    context,
                    next_parent,
                    completion,
                );
            }
        }),
    );
    parent.attach(child);
}

fn serial_contains(
    caches: Backends,
    remaining: usize,
    key: String,
    scope: CacheType,
    completion: ContainsCompletion,
) {
    if remaining == 0 {
        completion(CacheType::None);
        return;
    }
    let cache = Arc::clone(&caches[remaining - 1]);
    let next_key = key.clone();
    cache.contains(
        &key,
        scope,
        Box::new(move |tier| {
            if tier.is_none() {
                serial_contains(caches, remaining - 1, next_key, scope, completion);
            } else {
                completion(tier);
            }
        }),
    );
}

impl CacheBackend for CachesManager {
    fn query(
        &self,
        key: &str,
        options: QueryOptions,
        context: &QueryContext,
        completion: QueryCompletion,
    ) -> AsyncTask {
        let caches = self.snapshot();
        if caches.is_empty() {
            completion(None, CacheType::None);
            return AsyncTask::completed();
        }

        match self.policies().query {
            OperationPolicy::HighestOnly => match caches.last() {
                Some(cache) => cache.query(key, options, context, completion),
                None => AsyncTask::completed(),
            },
            OperationPolicy::LowestOnly => match caches.first() {
                Some(cache) => cache.query(key, options, context, completion),
                None => AsyncTask::completed(),
            },
            OperationPolicy::Serial => {
                let parent = AsyncTask::new();
                let remaining = caches.len();
                serial_query(
                    caches,
                    remaining,
                    key.to_string(),
                    options,
                    *context,
                    parent.clone(),
                    completion,
                );
                parent
            }
            OperationPolicy::Concurrent => {
                let parent = AsyncTask::new();
                let results: Arc<Mutex<Vec<Option<(SharedValue, CacheType)>>>> =
                    Arc::new(Mutex::new(vec![None; caches.len()]));

                let done_parent = parent.clone();
                let done_results = Arc::clone(&results);
                let fan_out = FanOut::new(caches.len(), move || {
                    // Highest-priority hit wins
                    let best = done_results.lock().iter_mut().rev().find_map(Option::take);
                    done_parent.complete(move || match best {
                        Some((value, tier)) => completion(Some(value), tier),
                        None => completion(None, CacheType::None),
                    });
                });

                for (index, cache) in caches.iter().enumerate() {
                    let fan_out = Arc::clone(&fan_out);
                    let results = Arc::clone(&results);
                    let child = cache.query(
                        key,
                        options,
                        context,
                        Box::new(move |value, tier| {
                            if let Some(value) = value {
                                results.lock()[index] = Some((value, tier));
                            }
                            fan_out.complete_one();
                        }),
                    );
                    parent.attach(child);
                }
                parent
            }
        }
    }

    fn store(
        &self,
        value: Option<SharedValue>,
        key: &str,
        options: StoreOptions,
        completion: Option<DoneCompletion>,
    ) {
        let key = key.to_string();
        let op: DoneOp = Arc::new(move |cache: &Backend, done: DoneCompletion| {
            cache.store(value.clone(), &key, options, Some(done));
        });
        self.fan_out_done(self.policies().store, op, completion);
    }

    fn remove(&self, key: &str, scope: CacheType, completion: Option<DoneCompletion>) {
        let key = key.to_string();
        let op: DoneOp = Arc::new(move |cache: &Backend, done: DoneCompletion| {
            cache.remove(&key, scope, Some(done));
        });
        self.fan_out_done(self.policies().remove, op, completion);
    }

    fn contains(&self, key: &str, scope: CacheType, completion: ContainsCompletion) {
        let caches = self.snapshot();
        if caches.is_empty() {
            completion(CacheType::None);
            return;
        }

        match self.policies().contains {
            OperationPolicy::HighestOnly => match caches.last() {
                Some(cache) => cache.contains(key, scope, completion),
                None => completion(CacheType::None),
            },
            OperationPolicy::LowestOnly => match caches.first() {
                Some(cache) => cache.contains(key, scope, completion),
                None => completion(CacheType::None),
            },
            OperationPolicy::Serial => {
                let remaining = caches.len();
                serial_contains(caches, remaining, key.to_string(), scope, completion);
            }
            OperationPolicy::Concurrent => {
                let results = Arc::new(Mutex::new(vec![CacheType::None; caches.len()]));
                let done_results = Arc::clone(&results);
                let fan_out = FanOut::new(caches.len(), move || {
                    let best = done_results
                        .lock()
                        .iter()
                        .rev()
                        .copied()
                        .find(|tier| !tier.is_none())
                        .unwrap_or(CacheType::None);
                    completion(best);
                });
                for (index, cache) in caches.iter().enumerate() {
                    let fan_out = Arc::clone(&fan_out);
                    let results = Arc::clone(&results);
                    cache.contains(
                        key,
                        scope,
                        Box::new(move |tier| {
                            results.lock()[index] = tier;
                            fan_out.complete_one();
                        }),
                    );
                }
            }
        }
    }

    fn clear(&self, scope: CacheType, completion: Option<DoneCompletion>) {
        let op: DoneOp = Arc::new(move |cache: &Backend, done: DoneCompletion| {
            cache.clear(scope, Some(done));
        });
        self.fan_out_done(self.policies().clear, op, completion);
    }

    fn calculate_size(&self, completion: SizeCompletion) {
        let caches = self.snapshot();
        if caches.is_empty() {
            completion(CacheSize::default());
            return;
        }

        let total = Arc::new(Mutex::new(CacheSize::default()));
        let done_total = Arc::clone(&total);
        let fan_out = FanOut::new(caches.len(), move || {
            let size = *done_total.lock();
            completion(size);
        });
        for cache in caches.iter() {
            let fan_out = Arc::clone(&fan_out);
            let total = Arc::clone(&total);
            cache.calculate_size(Box::new(move |size| {
                {
                    let mut total = total.lock();
                    *total = *total + size;
                }
                fan_out.complete_one();
            }));
        }
    }
}

impl std::fmt::Debug for CachesManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachesManager")
            .field("caches", &self.len())
            .field("policies", &self.policies())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::CacheBackendExt;
    use crate::cache::value::CacheValue;
    use std::collections::HashMap;

    /// Backend that records calls into a shared log and answers inline
    struct RecordingBackend {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        entries: Mutex<HashMap<String, SharedValue>>,
    }

    impl RecordingBackend {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                entries: Mutex::new(HashMap::new()),
            })
        }

        fn with_entry(self: Arc<Self>, key: &str, value: &str) -> Arc<Self> {
            self.entries.lock().insert(
                key.to_string(),
                Arc::new(CacheValue::bytes(value.as_bytes().to_vec())),
            );
            self
        }

        fn record(&self, op: &str) {
            self.log.lock().push(format!("{}:{}", op, self.name));
        }

        fn has(&self, key: &str) -> bool {
            self.entries.lock().contains_key(key)
        }
    }

    impl CacheBackend for RecordingBackend {
        fn query(
            &self,
            key: &str,
            _options: QueryOptions,
            _context: &QueryContext,
            completion: QueryCompletion,
        ) -> AsyncTask {
            self.record("query");
            let value = self.entries.lock().get(key).cloned();
            let tier = if value.is_some() {
                CacheType::Memory
            } else {
                CacheType::None
            };
            let task = AsyncTask::new();
            task.complete(move || completion(value, tier));
            task
        }

        fn store(
            &self,
            value: Option<SharedValue>,
            key: &str,
            _options: StoreOptions,
            completion: Option<DoneCompletion>,
        ) {
            self.record("store");
            if let Some(value) = value {
                self.entries.lock().insert(key.to_string(), value);
            }
            finish(completion);
        }

        fn remove(&self, key: &str, _scope: CacheType, completion: Option<DoneCompletion>) {
            self.record("remove");
            self.entries.lock().remove(key);
            finish(completion);
        }

        fn contains(&self, key: &str, _scope: CacheType, completion: ContainsCompletion) {
            self.record("contains");
            completion(if self.has(key) {
                CacheType::Disk
            } else {
                CacheType::None
            });
        }

        fn clear(&self, _scope: CacheType, completion: Option<DoneCompletion>) {
            self.record("clear");
            self.entries.lock().clear();
            finish(completion);
        }

        fn calculate_size(&self, completion: SizeCompletion) {
            completion(CacheSize {
                file_count: self.entries.lock().len() as u64,
                total_size: 1,
            });
        }
    }

    fn manager_with(backends: &[Arc<RecordingBackend>]) -> CachesManager {
        let manager = CachesManager::new();
        for backend in backends {
            manager.add_cache(backend.clone());
        }
        manager
    }

    #[tokio::test]
    async fn test_serial_query_falls_back_to_lower_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingBackend::new("low", &log).with_entry("k", "from-low");
        let high = RecordingBackend::new("high", &log);
        let manager = manager_with(&[low, high]);

        let (value, tier) = manager
            .query_async("k", QueryOptions::default(), QueryContext::default())
            .await;
        assert_eq!(tier, CacheType::Memory);
        assert_eq!(value.unwrap().as_bytes().unwrap().as_ref(), b"from-low");
        assert_eq!(*log.lock(), vec!["query:high", "query:low"]);
    }

    #[tokio::test]
    async fn test_serial_query_stops_at_first_hit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingBackend::new("low", &log).with_entry("k", "low");
        let high = RecordingBackend::new("high", &log).with_entry("k", "high");
        let manager = manager_with(&[low, high]);

        let (value, _) = manager
            .query_async("k", QueryOptions::default(), QueryContext::default())
            .await;
        assert_eq!(value.unwrap().as_bytes().unwrap().as_ref(), b"high");
        assert_eq!(*log.lock(), vec!["query:high"]);
    }

    #[tokio::test]
    async fn test_all_miss_reports_none() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = manager_with(&[
            RecordingBackend::new("a", &log),
            RecordingBackend::new("b", &log),
        ]);
        for policy in [OperationPolicy::Serial, OperationPolicy::Concurrent] {
            manager.set_query_policy(policy);
            let (value, tier) = manager
                .query_async("k", QueryOptions::default(), QueryContext::default())
                .await;
            assert!(value.is_none());
            assert_eq!(tier, CacheType::None);
        }
    }

    #[tokio::test]
    async fn test_concurrent_query_prefers_highest_hit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingBackend::new("low", &log).with_entry("k", "low");
        let high = RecordingBackend::new("high", &log).with_entry("k", "high");
        let manager = manager_with(&[low, high]);
        manager.set_query_policy(OperationPolicy::Concurrent);

        let (value, _) = manager
            .query_async("k", QueryOptions::default(), QueryContext::default())
            .await;
        assert_eq!(value.unwrap().as_bytes().unwrap().as_ref(), b"high");
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_store_default_targets_highest_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingBackend::new("low", &log);
        let high = RecordingBackend::new("high", &log);
        let manager = manager_with(&[low.clone(), high.clone()]);

        manager
            .store_async(
                Arc::new(CacheValue::bytes(vec![1])),
                "k",
                StoreOptions::default(),
            )
            .await;
        assert!(high.has("k"));
        assert!(!low.has("k"));
    }

    #[tokio::test]
    async fn test_store_lowest_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingBackend::new("low", &log);
        let high = RecordingBackend::new("high", &log);
        let manager = manager_with(&[low.clone(), high.clone()]);
        manager.set_store_policy(OperationPolicy::LowestOnly);

        manager
            .store_async(
                Arc::new(CacheValue::bytes(vec![1])),
                "k",
                StoreOptions::default(),
            )
            .await;
        assert!(low.has("k"));
        assert!(!high.has("k"));
    }

    #[tokio::test]
    async fn test_serial_remove_visits_every_backend_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingBackend::new("a", &log).with_entry("k", "1");
        let b = RecordingBackend::new("b", &log).with_entry("k", "2");
        let c = RecordingBackend::new("c", &log);
        let manager = manager_with(&[a.clone(), b.clone(), c]);
        manager.set_remove_policy(OperationPolicy::Serial);

        manager.remove_async("k", CacheType::All).await;
        assert_eq!(*log.lock(), vec!["remove:c", "remove:b", "remove:a"]);
        assert!(!a.has("k"));
        assert!(!b.has("k"));
    }

    #[tokio::test]
    async fn test_concurrent_clear_waits_for_all() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingBackend::new("a", &log).with_entry("k", "1");
        let b = RecordingBackend::new("b", &log).with_entry("k", "2");
        let manager = manager_with(&[a.clone(), b.clone()]);

        manager.clear_async(CacheType::All).await;
        assert!(!a.has("k"));
        assert!(!b.has("k"));
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_contains_policies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingBackend::new("low", &log).with_entry("k", "1");
        let high = RecordingBackend::new("high", &log);
        let manager = manager_with(&[low, high]);

        assert_eq!(manager.contains_async("k", CacheType::All).await, CacheType::Disk);
        assert_eq!(*log.lock(), vec!["contains:high", "contains:low"]);

        manager.set_contains_policy(OperationPolicy::HighestOnly);
        assert_eq!(manager.contains_async("k", CacheType::All).await, CacheType::None);

        manager.set_contains_policy(OperationPolicy::Concurrent);
        assert_eq!(manager.contains_async("k", CacheType::All).await, CacheType::Disk);
    }

    #[tokio::test]
    async fn test_calculate_size_sums_backends() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingBackend::new("a", &log).with_entry("x", "1");
        let b = RecordingBackend::new("b", &log);
        let manager = manager_with(&[a, b]);

        let size = manager.calculate_size_async().await;
        assert_eq!(size.file_count, 1);
        assert_eq!(size.total_size, 2);
    }

    #[tokio::test]
    async fn test_empty_manager_misses() {
        let manager = CachesManager::new();
        assert!(manager.is_empty());
        let (value, tier) = manager
            .query_async("k", QueryOptions::default(), QueryContext::default())
            .await;
        assert!(value.is_none());
        assert_eq!(tier, CacheType::None);
        manager.clear_async(CacheType::All).await;
    }

    #[test]
    fn test_add_remove_cache_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = CachesManager::new();
        let a: Backend = RecordingBackend::new("a", &log);
        let b: Backend = RecordingBackend::new("b", &log);
        manager.add_cache(a.clone());
        manager.add_cache(b.clone());
        assert_eq!(manager.len(), 2);

        assert!(manager.remove_cache(&a));
        assert!(!manager.remove_cache(&a));
        let remaining = manager.caches();
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &b));
    }

    #[tokio::test]
    async fn test_managers_nest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::new(manager_with(&[
            RecordingBackend::new("inner", &log).with_entry("k", "nested")
        ]));
        let outer = CachesManager::new();
        outer.add_cache(inner);

        let (value, _) = outer
            .query_async("k", QueryOptions::default(), QueryContext::default())
            .await;
        assert_eq!(value.unwrap().as_bytes().unwrap().as_ref(), b"nested");
    }

    #[test]
    fn test_cancel_suppresses_serial_completion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = manager_with(&[RecordingBackend::new("a", &log)]);
        let parent = AsyncTask::new();
        parent.cancel();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        serial_query(
            Arc::new(manager.caches()),
            1,
            "k".to_string(),
            QueryOptions::default(),
            QueryContext::default(),
            parent,
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(log.lock().is_empty());
    }
}

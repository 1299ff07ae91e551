//! Two-Tier Blob Cache
//!
//! Memory + disk caching for byte-serializable payloads keyed by opaque strings.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         CachesManager                                │
//! │        (ordered backends, per-operation fan-out policy)              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  CacheCombine (ns "a")        │  CacheCombine (ns "b")    │  ...     │
//! │  ┌──────────────┐             │  ┌──────────────┐         │          │
//! │  │ MemoryCache  │ LRU + weak  │  │ MemoryCache  │         │          │
//! │  └──────┬───────┘             │  └──────┬───────┘         │          │
//! │         │ miss                │         │                 │          │
//! │  ┌──────▼───────┐ SerialQueue │  ┌──────▼───────┐         │          │
//! │  │  DiskCache   │ per root    │  │  DiskCache   │         │          │
//! │  │ sha256 files │             │  │ sha256 files │         │          │
//! │  └──────┬───────┘             │  └──────────────┘         │          │
//! │         │ miss                │                           │          │
//! │   preload resolver (read-only)│                           │          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! - Memory operations run on the caller under one lock per memory tier
//! - Disk operations for one facade run in order on its own worker thread
//! - Deferred completions run on a shared callback thread
//! - Every asynchronous query returns an `AsyncTask`; a canceled task never
//!   invokes its completion

pub mod backend;
pub mod combine;
pub mod config;
pub mod disk;
mod fence;
pub mod in_memory;
pub mod lifecycle;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod side_channel;
pub mod task;
pub mod trim;
pub mod value;

pub use backend::{
    CacheBackend, CacheBackendExt, CacheSize, ContainsCompletion, DoneCompletion,
    QueryCompletion, QueryContext, QueryOptions, SizeCompletion, StoreOptions,
};
pub use combine::{default_cache_directory, CacheCombine, CacheCombineBuilder, PreloadResolver};
pub use config::{CacheConfig, DiskReadMode, DiskWriteMode, ExpireType};
pub use disk::{move_cache_directory, DiskCache, DiskCacheBackend, MigrationReport, TrimReport};
pub use in_memory::InMemoryDiskCache;
pub use lifecycle::{LifecycleEvent, LifecycleHub, LifecycleObserver};
pub use manager::CachesManager;
pub use memory::{MemoryCache, MemoryCacheBackend, MemoryStats};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use policy::{ManagerPolicies, OperationPolicy};
pub use side_channel::{SiblingFileSideChannel, SideChannel};
pub use task::{AsyncTask, TaskState};
pub use value::{CacheType, CacheValue, SharedValue};

/// Length of a primary blob file name (hex SHA-256)
pub const CACHE_FILE_NAME_LEN: usize = 64;

// =============================================================================
// Tests
// =============================================================================

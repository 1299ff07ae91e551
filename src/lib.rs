//! blobtier - Two-Tier Blob Cache Engine
//!
//! Memory + disk caching for JSON-like payloads keyed by request identifiers.
//!
//! # Architecture
//!
//! ```text
//! CachesManager ──▶ CacheCombine ──▶ MemoryCache (LRU cost/count + weak resurrection)
//!                                └─▶ DiskCache   (sha256 files, side channel, trim, migration)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Memory tier, disk tier, facade and multi-backend manager
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blobtier::cache::{CacheBackend, CacheCombine, CacheValue, StoreOptions};
//!
//! let cache = CacheCombine::builder("feeds").build();
//! let value = Arc::new(CacheValue::json(serde_json::json!({"id": 1})));
//! cache.store(Some(value), "GET /feeds/1", StoreOptions::default(), None);
//! assert!(cache.memory_value("GET /feeds/1").is_some());
//! ```

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    AsyncTask, CacheBackend, CacheBackendExt, CacheCombine, CacheConfig, CacheType, CacheValue,
    CachesManager, DiskCache, MemoryCache, OperationPolicy,
};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

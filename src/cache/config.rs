//! Cache Configuration
//!
//! Snapshot of limits, policies and I/O options. Each cache copies the
//! configuration it was built with, so later edits by the caller never
//! reach a running cache.

use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default maximum disk age: one week
pub const DEFAULT_MAX_DISK_AGE_SECS: i64 = 60 * 60 * 24 * 7;

/// Which filesystem timestamp drives disk-entry age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireType {
    /// Last access time
    Access,
    /// Last content modification (default)
    #[default]
    Modification,
    /// Creation time (falls back to modification where unsupported)
    Creation,
    /// Inode change time (falls back to modification on non-unix)
    Change,
}

/// How blobs are written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskWriteMode {
    /// Write to a temp file, then rename over the target
    #[default]
    Atomic,
    /// Write in place
    Direct,
    /// Never replace an existing blob
    WithoutOverwriting,
}

/// How blobs are read from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskReadMode {
    /// Plain buffered read
    #[default]
    Buffered,
    /// Treat a blob whose length changed during the read as a miss
    VerifyLength,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum total memory cost (0 = unbounded)
    pub max_memory_cost: u64,
    /// Maximum number of memory entries (0 = unbounded)
    pub max_memory_count: u64,
    /// Seconds before a disk entry expires (negative = never, 0 = all on sweep)
    pub max_disk_age_secs: i64,
    /// Maximum disk footprint in bytes (0 = unbounded)
    pub max_disk_size: u64,
    /// Timestamp used for age and trim ordering
    pub disk_cache_expire_type: ExpireType,
    /// Enables the memory tier
    pub should_cache_in_memory: bool,
    /// Enables weak-reference resurrection in the memory tier
    pub should_use_weak_memory_cache: bool,
    /// Exclude the disk directory from device backups
    pub should_disable_icloud: bool,
    /// Sweep expired disk entries when the host enters background
    pub should_remove_expired_data_when_enter_background: bool,
    /// Disk write behaviour
    pub disk_write_mode: DiskWriteMode,
    /// Disk read behaviour
    pub disk_read_mode: DiskReadMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_cost: 0,
            max_memory_count: 0,
            max_disk_age_secs: DEFAULT_MAX_DISK_AGE_SECS,
            max_disk_size: 0,
            disk_cache_expire_type: ExpireType::default(),
            should_cache_in_memory: true,
            should_use_weak_memory_cache: true,
            should_disable_icloud: true,
            should_remove_expired_data_when_enter_background: true,
            disk_write_mode: DiskWriteMode::default(),
            disk_read_mode: DiskReadMode::default(),
        }
    }
}

impl CacheConfig {
    /// Parse a configuration from YAML (JSON is valid YAML too)
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(input)?;
        Ok(config.normalized())
    }

    /// Load a configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Resolve dependent options: the weak table is meaningless without a memory tier.
    pub fn normalized(mut self) -> Self {
        if !self.should_cache_in_memory {
            self.should_use_weak_memory_cache = false;
        }
        self
    }

    /// Maximum disk age, `None` when entries never expire
    pub fn max_disk_age(&self) -> Option<Duration> {
        u64::try_from(self.max_disk_age_secs)
            .ok()
            .map(Duration::from_secs)
    }

    /// Cut-off instant for the age sweep: entries at or before it are expired
    pub fn expiration_cutoff(&self, now: SystemTime) -> Option<SystemTime> {
        let age = self.max_disk_age()?;
        Some(now.checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH))
    }
}

// =============================================================================
// Tests
// =============================================================================

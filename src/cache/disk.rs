//! Disk Cache - Durable Per-key Blob Store
//!
//! One file per key under the cache root, named by the SHA-256 of the key,
//! with optional side-channel metadata next to it.
//!
//! # Layout
//!
//! ```text
//! {root}/CACHEDIR.TAG        backup exclusion tag
//! {root}/{sha256 hex}        primary blob
//! {root}/{sha256 hex}.ext    side-channel metadata
//! {root}/{sha256 hex}.tmp    in-flight atomic write
//! ```
//!
//! Every method blocks on the calling thread. Callers that share a directory
//! serialize access themselves (see `CacheCombine`); nothing here locks files.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::{CacheConfig, DiskReadMode, DiskWriteMode, ExpireType};
use super::side_channel::{SideChannel, SiblingFileSideChannel};
use super::trim::{plan_trim, TrimCandidate};
use crate::error::{Error, Result};

/// Backup exclusion tag file name
pub const CACHEDIR_TAG: &str = "CACHEDIR.TAG";

const CACHEDIR_TAG_CONTENT: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by blobtier.\n\
# For information about cache directory tags see https://bford.info/cachedir/\n";

const TEMP_EXTENSION: &str = "tmp";

/// Temp files older than this are leftovers from an interrupted write
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Contract for a pluggable disk tier.
///
/// Failures never surface: reads report a miss, writes fail silently.
pub trait DiskCacheBackend: Send + Sync {
    /// True if a primary blob exists for `key`
    fn contains(&self, key: &str) -> bool;

    /// Read the primary blob
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Write the primary blob
    fn set(&self, key: &str, data: &[u8]);

    /// Read side-channel metadata
    fn get_extended(&self, key: &str) -> Option<Vec<u8>>;

    /// Write side-channel metadata; `None` deletes it. The primary blob is never touched.
    fn set_extended(&self, key: &str, data: Option<&[u8]>);

    /// Remove the primary blob and its metadata
    fn remove(&self, key: &str);

    /// Wipe the store
    fn remove_all(&self);

    /// Two-phase trim: age, then size
    fn remove_expired(&self);

    /// Location of the primary blob for `key` (no I/O)
    fn path_for_key(&self, key: &str) -> PathBuf;

    /// Number of stored entries
    fn total_count(&self) -> u64;

    /// Total bytes of stored entries
    fn total_size(&self) -> u64;
}

/// Hex SHA-256 of `key`; the file name of its primary blob
pub fn cache_file_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_entry_name(name: &str) -> bool {
    name.len() == super::CACHE_FILE_NAME_LEN
        && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Governing timestamp for `expire`
pub fn entry_timestamp(meta: &Metadata, expire: ExpireType) -> Option<SystemTime> {
    let time = match expire {
        ExpireType::Access => meta.accessed().or_else(|_| meta.modified()),
        ExpireType::Modification => meta.modified(),
        ExpireType::Creation => meta.created().or_else(|_| meta.modified()),
        ExpireType::Change => change_time(meta),
    };
    time.ok()
}

#[cfg(unix)]
fn change_time(meta: &Metadata) -> std::io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;

    let secs = meta.ctime();
    let nanos = meta.ctime_nsec().clamp(0, 999_999_999) as u32;
    if secs >= 0 {
        Ok(SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nanos))
    } else {
        meta.modified()
    }
}

#[cfg(not(unix))]
fn change_time(meta: &Metadata) -> std::io::Result<SystemTime> {
    meta.modified()
}

/// Outcome of one trim pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Entries removed by age
    pub expired: usize,
    /// Entries removed to fit the size budget
    pub oversize: usize,
    /// Orphaned metadata and stale temp files removed
    pub orphans: usize,
    /// Bytes left after the pass
    pub retained_size: u64,
}

/// File-backed disk tier
pub struct DiskCache {
    root: PathBuf,
    config: CacheConfig,
    side: Box<dyn SideChannel>,
}

impl DiskCache {
    /// Open (creating if needed) a disk cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>, config: &CacheConfig) -> Result<Self> {
        Self::with_side_channel(root, config, Box::new(SiblingFileSideChannel::new()))
    }

    /// Open a disk cache with a custom side channel
    pub fn with_side_channel(
        root: impl Into<PathBuf>,
        config: &CacheConfig,
        side: Box<dyn SideChannel>,
    ) -> Result<Self> {
        let cache = Self {
            root: root.into(),
            config: config.clone().normalized(),
            side,
        };
        cache.prepare_root()?;
        Ok(cache)
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration snapshot
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn prepare_root(&self) -> Result<()> {
        let created = !self.root.is_dir();
        fs::create_dir_all(&self.root).map_err(|source| Error::CacheDirectory {
            path: self.root.clone(),
            source,
        })?;
        if created {
            info!(path = %self.root.display(), "Created disk cache directory");
        }
        if self.config.should_disable_icloud {
            self.write_backup_exclusion();
        }
        Ok(())
    }

    fn write_backup_exclusion(&self) {
        let tag = self.root.join(CACHEDIR_TAG);
        if tag.exists() {
            return;
        }
        if let Err(e) = fs::write(&tag, CACHEDIR_TAG_CONTENT) {
            warn!(path = %tag.display(), error = %e, "Failed to write cache directory tag");
        }
    }

    fn temp_path(primary: &Path) -> PathBuf {
        primary.with_extension(TEMP_EXTENSION)
    }

    fn try_get(&self, path: &Path) -> Result<Option<Bytes>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let expected = file.metadata()?.len();
        let mut data = Vec::with_capacity(expected as usize);
        file.read_to_end(&mut data)?;
        Ok(self.accept_read(path, expected, data))
    }

    /// Apply the read mode to a finished read of `expected` bytes
    fn accept_read(&self, path: &Path, expected: u64, data: Vec<u8>) -> Option<Bytes> {
        if self.config.disk_read_mode == DiskReadMode::VerifyLength && data.len() as u64 != expected
        {
            warn!(
                path = %path.display(),
                expected,
                read = data.len(),
                "Blob changed length during read"
            );
            return None;
        }
        Some(Bytes::from(data))
    }

    fn try_set(&self, path: &Path, data: &[u8]) -> Result<()> {
        if !self.root.is_dir() {
            self.prepare_root()?;
        }

        match self.config.disk_write_mode {
            DiskWriteMode::Atomic => {
                let temp = Self::temp_path(path);
                let written = fs::write(&temp, data).and_then(|_| fs::rename(&temp, path));
                if let Err(e) = written {
                    let _ = fs::remove_file(&temp);
                    return Err(e.into());
                }
            }
            DiskWriteMode::Direct => fs::write(path, data)?,
            DiskWriteMode::WithoutOverwriting => {
                match OpenOptions::new().write(true).create_new(true).open(path) {
                    Ok(mut file) => file.write_all(data)?,
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        debug!(path = %path.display(), "Blob exists, not overwriting");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    fn try_remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.side.remove(path)?;
        Ok(())
    }

    fn try_remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.prepare_root()?;
        info!(path = %self.root.display(), "Disk cache wiped");
        Ok(())
    }

    /// Primary blobs with their metadata
    fn entries(&self) -> Result<Vec<(PathBuf, Metadata)>> {
        let reader = match fs::read_dir(&self.root) {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_str().is_some_and(is_entry_name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push((entry.path(), meta));
        }
        Ok(entries)
    }

    /// Remove side records with no primary blob and interrupted temp files
    fn remove_orphans(&self, now: SystemTime) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();

            let orphan = if let Some(primary) = self.side.primary_for(&path) {
                !primary.exists()
            } else if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .map(|modified| {
                        now.duration_since(modified).unwrap_or_default() >= STALE_TEMP_AGE
                    })
                    .unwrap_or(false)
            } else {
                false
            };

            if orphan {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphan"),
                }
            }
        }
        Ok(removed)
    }

    /// Run a trim pass and report what it removed
    pub fn trim(&self) -> Result<TrimReport> {
        let now = SystemTime::now();
        let expire = self.config.disk_cache_expire_type;

        let candidates: Vec<_> = self
            .entries()?
            .into_iter()
            .map(|(path, meta)| {
                let timestamp = entry_timestamp(&meta, expire).unwrap_or(now);
                TrimCandidate::new(path, timestamp, meta.len())
            })
            .collect();

        let plan = plan_trim(
            candidates,
            self.config.expiration_cutoff(now),
            self.config.max_disk_size,
        );

        for path in plan.removals() {
            if let Err(e) = self.try_remove(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove trimmed entry");
            }
        }

        let orphans = self.remove_orphans(now)?;

        let report = TrimReport {
            expired: plan.expired.len(),
            oversize: plan.oversize.len(),
            orphans,
            retained_size: plan.retained_size,
        };
        debug!(
            expired = report.expired,
            oversize = report.oversize,
            orphans = report.orphans,
            retained_size = report.retained_size,
            "Disk trim complete"
        );
        Ok(report)
    }

    /// Count and size in one directory scan
    pub fn usage(&self) -> Result<(u64, u64)> {
        let entries = self.entries()?;
        let size = entries.iter().map(|(_, meta)| meta.len()).sum();
        Ok((entries.len() as u64, size))
    }
}

impl DiskCacheBackend for DiskCache {
    fn contains(&self, key: &str) -> bool {
        self.path_for_key(key).is_file()
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        let path = self.path_for_key(key);
        match self.try_get(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "Disk read failed");
                None
            }
        }
    }

    fn set(&self, key: &str, data: &[u8]) {
        let path = self.path_for_key(key);
        if let Err(e) = self.try_set(&path, data) {
            warn!(key, error = %e, "Disk write failed");
        }
    }

    fn get_extended(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for_key(key);
        match self.side.get(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "Metadata read failed");
                None
            }
        }
    }

    fn set_extended(&self, key: &str, data: Option<&[u8]>) {
        let path = self.path_for_key(key);
        let outcome = match data {
            Some(data) if path.is_file() => self.side.set(&path, data),
            Some(_) => {
                debug!(key, "No blob for metadata, skipping");
                Ok(())
            }
            None => self.side.remove(&path),
        };
        if let Err(e) = outcome {
            warn!(key, error = %e, "Metadata write failed");
        }
    }

    fn remove(&self, key: &str) {
        let path = self.path_for_key(key);
        if let Err(e) = self.try_remove(&path) {
            warn!(key, error = %e, "Disk remove failed");
        }
    }

    fn remove_all(&self) {
        if let Err(e) = self.try_remove_all() {
            warn!(path = %self.root.display(), error = %e, "Disk wipe failed");
        }
    }

    fn remove_expired(&self) {
        if let Err(e) = self.trim() {
            warn!(path = %self.root.display(), error = %e, "Disk trim failed");
        }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.root.join(cache_file_name(key))
    }

    fn total_count(&self) -> u64 {
        match self.usage() {
            Ok((count, _)) => count,
            Err(e) => {
                warn!(error = %e, "Disk scan failed");
                0
            }
        }
    }

    fn total_size(&self) -> u64 {
        match self.usage() {
            Ok((_, size)) => size,
            Err(e) => {
                warn!(error = %e, "Disk scan failed");
                0
            }
        }
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .finish()
    }
}

// =============================================================================
// Directory migration
// =============================================================================

/// Outcome of a directory migration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Entries moved into the destination
    pub moved: usize,
    /// Entries left behind because the destination already had them
    pub skipped: usize,
    /// Entries that could not be moved
    pub failed: usize,
}

/// Move a cache root from `src` to `dst`.
///
/// - `src` absent: nothing happens
/// - `dst` absent: plain rename
/// - `dst` is a directory: merge, keeping `dst`'s existing entries, then delete `src`
/// - `dst` is a file: delete it, then rename
///
/// The merge is best-effort: a file that cannot be moved is logged and skipped.
pub fn move_cache_directory(src: &Path, dst: &Path) -> Result<MigrationReport> {
    if src == dst || fs::symlink_metadata(src).is_err() {
        return Ok(MigrationReport::default());
    }

    let migration_error = |reason: String| Error::Migration {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        reason,
    };

    match fs::metadata(dst) {
        Ok(meta) if meta.is_dir() => return merge_directory(src, dst),
        Ok(_) => {
            fs::remove_file(dst)
                .map_err(|e| migration_error(format!("cannot remove destination file: {}", e)))?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| migration_error(format!("cannot create parent: {}", e)))?;
    }

    match fs::rename(src, dst) {
        Ok(()) => {
            info!(from = %src.display(), to = %dst.display(), "Cache directory moved");
            Ok(MigrationReport::default())
        }
        Err(e) => {
            debug!(error = %e, "Rename failed, falling back to merge");
            fs::create_dir_all(dst)
                .map_err(|e| migration_error(format!("cannot create destination: {}", e)))?;
            merge_directory(src, dst)
        }
    }
}

fn merge_directory(src: &Path, dst: &Path) -> Result<MigrationReport> {
    let side = SiblingFileSideChannel::new();
    let mut report = MigrationReport::default();

    for entry in fs::read_dir(src)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Unreadable entry during migration");
                report.failed += 1;
                continue;
            }
        };
        let from = entry.path();
        let to = dst.join(entry.file_name());

        // Metadata follows its blob: never pair src metadata with a dst blob
        let pairs_with_existing = side
            .primary_for(&to)
            .is_some_and(|primary| primary.exists());
        if to.exists() || pairs_with_existing {
            report.skipped += 1;
            continue;
        }

        let moved = fs::rename(&from, &to).or_else(|_| {
            if from.is_file() {
                fs::copy(&from, &to).map(|_| ())
            } else {
                Err(std::io::Error::new(
                    ErrorKind::Other,
                    "cannot move directory across filesystems",
                ))
            }
        });
        match moved {
            Ok(()) => report.moved += 1,
            Err(e) => {
                warn!(path = %from.display(), error = %e, "Failed to migrate cache entry");
                report.failed += 1;
            }
        }
    }

    if let Err(e) = fs::remove_dir_all(src) {
        warn!(path = %src.display(), error = %e, "Failed to remove migrated directory");
    }

    info!(
        from = %src.display(),
        to = %dst.display(),
        moved = report.moved,
        skipped = report.skipped,
        failed = report.failed,
        "Cache directory merged"
    );
    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::FileTimes;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DiskCache {
        DiskCache::new(dir.path().join("cache"), &CacheConfig::default()).unwrap()
    }

    fn rewind(path: &Path, by: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    fn rewind_access(path: &Path, by: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_times(FileTimes::new().set_accessed(SystemTime::now() - by))
            .unwrap();
    }

    fn open_with(dir: &TempDir, config: CacheConfig) -> DiskCache {
        DiskCache::new(dir.path().join("cache"), &config).unwrap()
    }

    #[test]
    fn test_file_name_is_stable_hex() {
        let name = cache_file_name("https://example.com/a?b=c");
        assert_eq!(name.len(), 64);
        assert!(is_entry_name(&name));
        assert_eq!(name, cache_file_name("https://example.com/a?b=c"));
        assert_ne!(name, cache_file_name("https://example.com/a?b=d"));
    }

    #[test]
    fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert!(!cache.contains("k"));
        assert!(cache.get("k").is_none());

        cache.set("k", b"hello");
        assert!(cache.contains("k"));
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(cache.total_count(), 1);
        assert_eq!(cache.total_size(), 5);

        cache.remove("k");
        assert!(!cache.contains("k"));
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_construction_writes_backup_tag() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        assert!(cache.root().join(CACHEDIR_TAG).exists());
        // Tag is not an entry
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_construction_fails_on_file_root() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let result = DiskCache::new(blocker.join("cache"), &CacheConfig::default());
        assert!(matches!(result, Err(Error::CacheDirectory { .. })));
    }

    #[test]
    fn test_path_for_key_is_pure() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let path = cache.path_for_key("never-stored");
        assert_eq!(path.parent(), Some(cache.root()));
        assert!(!path.exists());
    }

    #[test]
    fn test_extended_data_lifecycle() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        // No blob: metadata is not written
        cache.set_extended("k", Some(b"meta"));
        assert!(cache.get_extended("k").is_none());

        cache.set("k", b"blob");
        cache.set_extended("k", Some(b"meta"));
        assert_eq!(cache.get_extended("k"), Some(b"meta".to_vec()));

        // Clearing metadata leaves the blob
        cache.set_extended("k", None);
        assert!(cache.get_extended("k").is_none());
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"blob"));

        // Removing the blob removes its metadata
        cache.set_extended("k", Some(b"meta"));
        cache.remove("k");
        assert!(cache.get_extended("k").is_none());
        assert!(!SiblingFileSideChannel::sidecar_path(&cache.path_for_key("k")).exists());
    }

    #[test]
    fn test_overwrite_replaces_blob() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("k", b"one");
        cache.set("k", b"two");
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"two"));
        assert!(!DiskCache::temp_path(&cache.path_for_key("k")).exists());
    }

    #[test]
    fn test_without_overwriting_mode() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            disk_write_mode: DiskWriteMode::WithoutOverwriting,
            ..Default::default()
        };
        let cache = DiskCache::new(dir.path().join("cache"), &config).unwrap();
        cache.set("k", b"first");
        cache.set("k", b"second");
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"first"));
    }

    #[test]
    fn test_remove_all_recreates_directory() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("a", b"1");
        cache.set("b", b"2");

        cache.remove_all();
        assert!(cache.root().is_dir());
        assert!(cache.root().join(CACHEDIR_TAG).exists());
        assert_eq!(cache.total_count(), 0);

        cache.set("c", b"3");
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_remove_expired_by_age() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_disk_age_secs: 3600,
            ..Default::default()
        };
        let cache = DiskCache::new(dir.path().join("cache"), &config).unwrap();
        cache.set("old", b"x");
        cache.set("fresh", b"y");
        rewind(&cache.path_for_key("old"), Duration::from_secs(7200));

        let report = cache.trim().unwrap();
        assert_eq!(report.expired, 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn test_zero_age_removes_everything() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_disk_age_secs: 0,
            ..Default::default()
        };
        let cache = DiskCache::new(dir.path().join("cache"), &config).unwrap();
        cache.set("a", b"1");
        cache.set("b", b"2");
        cache.remove_expired();
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_negative_age_never_expires() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_disk_age_secs: -1,
            ..Default::default()
        };
        let cache = DiskCache::new(dir.path().join("cache"), &config).unwrap();
        cache.set("a", b"1");
        rewind(&cache.path_for_key("a"), Duration::from_secs(365 * 24 * 3600));
        cache.remove_expired();
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_size_phase_removes_oldest() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_disk_age_secs: -1,
            max_disk_size: 25,
            ..Default::default()
        };
        let cache = DiskCache::new(dir.path().join("cache"), &config).unwrap();
        cache.set("oldest", &[0u8; 10]);
        cache.set("middle", &[0u8; 10]);
        cache.set("newest", &[0u8; 10]);
        rewind(&cache.path_for_key("oldest"), Duration::from_secs(300));
        rewind(&cache.path_for_key("middle"), Duration::from_secs(200));
        rewind(&cache.path_for_key("newest"), Duration::from_secs(100));

        let report = cache.trim().unwrap();
        assert_eq!(report.oversize, 1);
        assert_eq!(report.retained_size, 20);
        assert!(!cache.contains("oldest"));
        assert!(cache.contains("middle"));
        assert!(cache.contains("newest"));
    }

    #[test]
    fn test_access_expire_type_follows_atime() {
        let dir = TempDir::new().unwrap();
        let cache = open_with(
            &dir,
            CacheConfig {
                max_disk_age_secs: 3600,
                disk_cache_expire_type: ExpireType::Access,
                ..Default::default()
            },
        );
        cache.set("stale-read", b"x");
        cache.set("stale-write", b"y");
        rewind_access(&cache.path_for_key("stale-read"), Duration::from_secs(7200));
        rewind(&cache.path_for_key("stale-write"), Duration::from_secs(7200));

        let report = cache.trim().unwrap();
        assert_eq!(report.expired, 1);
        assert!(!cache.contains("stale-read"));
        assert!(cache.contains("stale-write"));
    }

    #[test]
    fn test_modification_expire_type_ignores_atime() {
        let dir = TempDir::new().unwrap();
        let cache = open_with(
            &dir,
            CacheConfig {
                max_disk_age_secs: 3600,
                disk_cache_expire_type: ExpireType::Modification,
                ..Default::default()
            },
        );
        cache.set("stale-read", b"x");
        cache.set("stale-write", b"y");
        rewind_access(&cache.path_for_key("stale-read"), Duration::from_secs(7200));
        rewind(&cache.path_for_key("stale-write"), Duration::from_secs(7200));

        cache.trim().unwrap();
        assert!(cache.contains("stale-read"));
        assert!(!cache.contains("stale-write"));
    }

    #[test]
    fn test_creation_expire_type_orders_by_birth() {
        let dir = TempDir::new().unwrap();
        let cache = open_with(
            &dir,
            CacheConfig {
                max_disk_age_secs: -1,
                max_disk_size: 15,
                disk_cache_expire_type: ExpireType::Creation,
                ..Default::default()
            },
        );
        cache.set("born-first", &[0u8; 10]);
        std::thread::sleep(Duration::from_millis(50));
        cache.set("born-second", &[0u8; 10]);
        // Old content timestamp on the younger file
        rewind(&cache.path_for_key("born-second"), Duration::from_secs(600));

        let birth_supported = fs::metadata(cache.path_for_key("born-first"))
            .and_then(|meta| meta.created())
            .is_ok();

        let report = cache.trim().unwrap();
        assert_eq!(report.oversize, 1);
        if birth_supported {
            assert!(!cache.contains("born-first"));
            assert!(cache.contains("born-second"));
        } else {
            // Falls back to modification time
            assert!(cache.contains("born-first"));
            assert!(!cache.contains("born-second"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_change_expire_type_orders_by_ctime() {
        let dir = TempDir::new().unwrap();
        let cache = open_with(
            &dir,
            CacheConfig {
                max_disk_age_secs: 3600,
                max_disk_size: 15,
                disk_cache_expire_type: ExpireType::Change,
                ..Default::default()
            },
        );
        cache.set("a", &[0u8; 10]);
        cache.set("b", &[0u8; 10]);
        // Each rewind touches ctime; "a" is touched last
        rewind(&cache.path_for_key("b"), Duration::from_secs(7200));
        std::thread::sleep(Duration::from_millis(50));
        rewind(&cache.path_for_key("a"), Duration::from_secs(3 * 7200));

        let report = cache.trim().unwrap();
        // Old mtimes do not count as expired under ctime
        assert_eq!(report.expired, 0);
        assert_eq!(report.oversize, 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_direct_write_mode() {
        let dir = TempDir::new().unwrap();
        let cache = open_with(
            &dir,
            CacheConfig {
                disk_write_mode: DiskWriteMode::Direct,
                ..Default::default()
            },
        );
        cache.set("k", b"first");
        cache.set("k", b"second, longer");
        cache.set("k", b"third");

        let path = cache.path_for_key("k");
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"third"));
        assert_eq!(fs::metadata(&path).unwrap().len(), 5);
        assert!(!DiskCache::temp_path(&path).exists());
    }

    #[test]
    fn test_verify_length_read_mode() {
        let dir = TempDir::new().unwrap();
        let cache = open_with(
            &dir,
            CacheConfig {
                disk_read_mode: DiskReadMode::VerifyLength,
                ..Default::default()
            },
        );
        cache.set("k", b"payload");
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"payload"));

        let path = cache.path_for_key("k");
        assert!(cache.accept_read(&path, 7, b"payload".to_vec()).is_some());
        // Short read of a blob that was replaced mid-read
        assert!(cache.accept_read(&path, 7, b"pay".to_vec()).is_none());
    }

    #[test]
    fn test_buffered_read_mode_accepts_length_change() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let path = cache.path_for_key("k");
        let data = cache.accept_read(&path, 7, b"pay".to_vec());
        assert_eq!(data, Some(Bytes::from_static(b"pay")));
    }

    #[test]
    fn test_trim_cleans_orphans() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let primary = cache.path_for_key("gone");
        fs::write(SiblingFileSideChannel::sidecar_path(&primary), b"meta").unwrap();
        let temp = DiskCache::temp_path(&cache.path_for_key("crashed"));
        fs::write(&temp, b"partial").unwrap();
        rewind(&temp, Duration::from_secs(2 * 3600));

        let report = cache.trim().unwrap();
        assert_eq!(report.orphans, 2);
        assert!(!temp.exists());
    }

    #[test]
    fn test_migration_into_absent_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("old");
        let dst = dir.path().join("nested").join("new");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), b"a").unwrap();
        fs::write(src.join("b"), b"b").unwrap();

        move_cache_directory(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("a")).unwrap(), b"a");
        assert_eq!(fs::read(dst.join("b")).unwrap(), b"b");
    }

    #[test]
    fn test_migration_merge_keeps_destination_entries() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("old");
        let dst = dir.path().join("new");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("a"), b"a").unwrap();
        fs::write(src.join("b"), b"b_new").unwrap();
        fs::write(dst.join("b"), b"b_old").unwrap();
        fs::write(dst.join("c"), b"c").unwrap();

        let report = move_cache_directory(&src, &dst).unwrap();
        assert_eq!(report.moved, 1);
        assert_eq!(report.skipped, 1);
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("a")).unwrap(), b"a");
        assert_eq!(fs::read(dst.join("b")).unwrap(), b"b_old");
        assert_eq!(fs::read(dst.join("c")).unwrap(), b"c");
    }

    #[test]
    fn test_migration_replaces_destination_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("old");
        let dst = dir.path().join("new");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), b"a").unwrap();
        fs::write(&dst, b"not a directory").unwrap();

        move_cache_directory(&src, &dst).unwrap();
        assert!(dst.is_dir());
        assert!(dst.join("a").exists());
        assert!(!src.exists());
    }

    #[test]
    fn test_migration_missing_source_is_noop() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("new");
        let report = move_cache_directory(&dir.path().join("missing"), &dst).unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(!dst.exists());
    }

    #[test]
    fn test_migrated_entries_readable_by_disk_cache() {
        let dir = TempDir::new().unwrap();
        let old_root = dir.path().join("v1");
        let new_root = dir.path().join("v2");
        {
            let old = DiskCache::new(&old_root, &CacheConfig::default()).unwrap();
            old.set("k", b"payload");
        }
        move_cache_directory(&old_root, &new_root).unwrap();
        let cache = DiskCache::new(&new_root, &CacheConfig::default()).unwrap();
        assert_eq!(cache.get("k").unwrap(), Bytes::from_static(b"payload"));
    }
}

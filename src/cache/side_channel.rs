//! Per-key metadata side channel
//!
//! Extended data lives next to the primary blob, independent of it except on
//! deletion. The portable implementation is a sibling file per key.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Extension used for sibling metadata files
pub const SIDECAR_EXTENSION: &str = "ext";

/// Small per-key side store addressed by the primary blob's path
pub trait SideChannel: Send + Sync {
    /// Read metadata for `primary`, `None` when absent
    fn get(&self, primary: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Write metadata for `primary`
    fn set(&self, primary: &Path, data: &[u8]) -> io::Result<()>;

    /// Remove metadata for `primary`; absent metadata is not an error
    fn remove(&self, primary: &Path) -> io::Result<()>;

    /// True if `path` is a record owned by this side channel
    fn is_side_record(&self, _path: &Path) -> bool {
        false
    }

    /// Primary blob path a side record belongs to
    fn primary_for(&self, _side: &Path) -> Option<PathBuf> {
        None
    }
}

/// Side channel backed by `<primary>.ext` sibling files
#[derive(Debug, Clone, Default)]
pub struct SiblingFileSideChannel;

impl SiblingFileSideChannel {
    /// Create a sibling-file side channel
    pub fn new() -> Self {
        Self
    }

    /// Path of the sibling file for `primary`
    pub fn sidecar_path(primary: &Path) -> PathBuf {
        primary.with_extension(SIDECAR_EXTENSION)
    }
}

impl SideChannel for SiblingFileSideChannel {
    fn get(&self, primary: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(Self::sidecar_path(primary)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, primary: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(Self::sidecar_path(primary), data)
    }

    fn remove(&self, primary: &Path) -> io::Result<()> {
        match fs::remove_file(Self::sidecar_path(primary)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn is_side_record(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == SIDECAR_EXTENSION)
    }

    fn primary_for(&self, side: &Path) -> Option<PathBuf> {
        if self.is_side_record(side) {
            Some(side.with_extension(""))
        } else {
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Error types for the blobtier cache engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache engine
///
/// Most of these never reach callers of the cache contract: disk tier
/// failures are logged and degrade to a miss or a silently failed store.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache directory could not be created or opened
    #[error("Cache directory {} is unusable: {source}", path.display())]
    CacheDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Directory migration failed before any file was moved
    #[error("Migration from {} to {} failed: {reason}", from.display(), to.display())]
    Migration {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// No disk tier is available for an operation that needs one
    #[error("No disk tier available")]
    NoDiskTier,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_directory_display() {
        let err = Error::CacheDirectory {
            path: PathBuf::from("/nope/cache"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope/cache"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}

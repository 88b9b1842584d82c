//! # Config - RiptideKV Settings
//!
//! Plain configuration structs with defaults, overridable through environment
//! variables:
//!
//! ```text
//! RIPTIDE_MAX_STREAM_LEN        Largest accepted streamed value  (default: 2147483647)
//! RIPTIDE_DISPOSE_AFTER_COMMIT  Dispose batches after commit     (default: "true")
//! RIPTIDE_WAL_PATH              WAL file path                    (default: "wal.log")
//! RIPTIDE_WAL_SYNC              fsync every WAL append           (default: "true")
//! ```
//!
//! Unparsable values fall back to the default silently.

use std::path::PathBuf;

/// Largest streamed value the staging layer accepts: the addressable size of
/// a single in-memory buffer downstream (`i32::MAX` bytes).
pub const DEFAULT_MAX_STREAM_LEN: u64 = i32::MAX as u64;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Settings for a single write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Streams whose declared length exceeds this are rejected at staging time.
    pub max_stream_len: u64,
    /// Initial value of the batch's dispose-after-commit flag.
    pub dispose_after_commit: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_stream_len: DEFAULT_MAX_STREAM_LEN,
            dispose_after_commit: true,
        }
    }
}

impl BatchConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_stream_len: env_or("RIPTIDE_MAX_STREAM_LEN", &d.max_stream_len.to_string())
                .parse()
                .unwrap_or(d.max_stream_len),
            dispose_after_commit: env_or("RIPTIDE_DISPOSE_AFTER_COMMIT", "true")
                .parse()
                .unwrap_or(d.dispose_after_commit),
        }
    }
}

/// Settings for the commit engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub wal_path: PathBuf,
    /// If `true`, every WAL append is followed by `fsync`.
    pub wal_sync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from("wal.log"),
            wal_sync: true,
        }
    }
}

impl EngineConfig {
    pub fn new<P: Into<PathBuf>>(wal_path: P, wal_sync: bool) -> Self {
        Self {
            wal_path: wal_path.into(),
            wal_sync,
        }
    }

    pub fn from_env() -> Self {
        Self {
            wal_path: PathBuf::from(env_or("RIPTIDE_WAL_PATH", "wal.log")),
            wal_sync: env_or("RIPTIDE_WAL_SYNC", "true").parse().unwrap_or(true),
        }
    }
}

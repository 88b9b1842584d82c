//! # Engine - RiptideKV Commit Executor
//!
//! Consumes a [`batch::WriteBatch`] and applies it atomically: validate every
//! staged operation, journal the survivors to the [`wal`], apply them to the
//! in-memory [`memtable`], then dispose the batch if it asks for that.
//!
//! ## Architecture
//!
//! ```text
//! WriteBatch
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs  for each tree:                      │
//! │             sorted_operations_mut(tree)       │
//! │               -> version / membership checks  │
//! │               -> ignored? skip : abort        │
//! │           WAL append_batch(seq, records)      │
//! │           Memtable apply                      │
//! │           dispose batch (if flagged)          │
//! │                                               │
//! │ read.rs   get / version_of / multi_values     │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                               |
//! |-------------|--------------------------------------------------------|
//! | [`lib.rs`]  | `Engine` struct, constructor, accessors, `Debug`       |
//! | [`recovery`]| WAL replay into a fresh Memtable                       |
//! | [`write`]   | `commit()`: validation, journaling, apply, dispose     |
//! | [`read`]    | `get()`, `version_of()`, `multi_values()`, `counter()` |
//! | [`error`]   | `CommitError`, the typed conflicts raised by commit    |
//!
//! ## Atomicity
//!
//! A commit either fails before anything is written or appends the whole
//! batch to the WAL (records plus commit marker) in one write before touching
//! the Memtable. Replay ignores batches whose commit marker is missing, and
//! the WAL writer cuts a failed append back before the next one.
mod error;
mod read;
mod recovery;
mod write;

use anyhow::Result;
use config::EngineConfig;
use memtable::Memtable;
use std::path::{Path, PathBuf};
use tracing::info;
use wal::WalWriter;

pub use error::CommitError;
pub use recovery::replay_wal_and_build;
pub use write::CommitSummary;

/// The commit executor and the state it commits into.
pub struct Engine {
    pub(crate) mem: Memtable,
    pub(crate) wal_path: PathBuf,
    pub(crate) wal_writer: WalWriter,

    /// Sequence number of the last committed batch.
    pub(crate) seq: u64,

    /// If `true`, every WAL append is followed by `fsync` for durability.
    pub(crate) wal_sync: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("seq", &self.seq)
            .field("wal_sync", &self.wal_sync)
            .field("wal_path", &self.wal_path)
            .field("memtable_size", &self.mem.approx_size())
            .field("trees", &self.mem.tree_names())
            .finish()
    }
}

impl Engine {
    /// Creates a new engine, replaying the WAL at `wal_path` first.
    ///
    /// # Arguments
    ///
    /// * `wal_path` - path to the write-ahead log file.
    /// * `wal_sync` - if `true`, every committed batch calls `fsync`.
    pub fn new<P: AsRef<Path>>(wal_path: P, wal_sync: bool) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();

        // replay wal into memtable and obtain last seq
        // (must happen BEFORE opening the writer to avoid file-sharing conflicts on Windows)
        let mut mem = Memtable::new();
        let seq = replay_wal_and_build(&wal_path, &mut mem)?;

        let wal_writer = WalWriter::create(&wal_path, wal_sync)?;

        info!(seq, wal = %wal_path.display(), "engine opened");

        Ok(Self {
            mem,
            wal_path,
            wal_writer,
            seq,
            wal_sync,
        })
    }

    pub fn open(config: &EngineConfig) -> Result<Self> {
        Self::new(&config.wal_path, config.wal_sync)
    }

    /// Returns the sequence number of the last committed batch.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }
}

#[cfg(test)]
mod tests;

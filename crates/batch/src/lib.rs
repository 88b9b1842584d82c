//! # Batch - RiptideKV Write Batch
//!
//! Stages uncommitted mutations across any number of named trees so a single
//! commit can apply them atomically.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   |  add / delete / increment        multi_add / multi_delete
//!   v                                         |
//! ┌───────────────────────────────────────────┼──────────┐
//! │                 WRITE BATCH               |          │
//! │                                           v          │
//! │  last-write map                  multi-value map     │
//! │  tree -> key -> op               tree -> key -> [op] │
//! │  (replace + version chain)       (append only)       │
//! │                                                      │
//! │  sorted_operations(tree):                            │
//! │     last-write ops by key, then multi ops by         │
//! │     (key, value), ties in call order                 │
//! └──────────────────────────────────────────────────────┘
//!   |
//!   v
//! commit executor -> journal -> trees -> dispose()
//! ```
//!
//! ## Rules
//!
//! - A key holds one last-write operation per tree. A later add, delete or
//!   increment replaces it, releasing any stream the old one held.
//! - Multi-value operations never replace each other.
//! - When a replacing operation expects version `N + 1` and the replaced one
//!   expected `N`, the replacement expects `N`: the executor validates
//!   against the version that existed before the batch.
//! - Tree name `None` is the root tree ([`slice::ROOT_TREE_NAME`]). An empty
//!   tree name is an error.
//! - Input errors are raised by the staging call itself and leave the batch
//!   untouched.
//!
//! A batch is built by one writer, handed to one executor and disposed once.
//! It performs no I/O of its own; streamed values are only probed for their
//! length when staged.
//!
//! ## Example
//!
//! ```rust
//! use batch::{OperationKind, WriteBatch};
//!
//! let mut wb = WriteBatch::new();
//! wb.add("user:1", "alice", Some("users"), None, false).unwrap();
//! wb.delete("user:1", Some("users"), None).unwrap();
//!
//! let ops: Vec<_> = wb.sorted_operations(Some("users")).collect();
//! assert_eq!(ops.len(), 1);
//! assert_eq!(ops[0].kind(), OperationKind::Delete);
//! ```

mod error;
mod operation;
mod store;

pub use error::{BatchError, Result};
pub use operation::{
    BatchOperation, ErrorKind, OperationKind, Payload, StreamValue, Value, ValueStream,
};
pub use store::{SortedOperations, SortedOperationsMut};

use config::BatchConfig;
use slice::Slice;
use store::OperationStore;
use tracing::{debug, warn};

/// Result of [`WriteBatch::try_get_pending`].
#[derive(Debug)]
pub struct Pending<'a> {
    /// `OperationKind::None` when the key has multi-value operations.
    pub kind: OperationKind,
    pub version: Option<u16>,
    pub value: PendingValue<'a>,
}

#[derive(Debug)]
pub enum PendingValue<'a> {
    /// Staged in-memory value of an Add.
    Bytes(Slice),
    /// Staged stream of an Add, rewound to where it was staged.
    Stream(&'a mut StreamValue),
    /// The key is pending deletion.
    Deleted,
    /// Staged increment.
    Delta(i64),
    /// The key has multi-value operations; there is no single current value.
    Unresolved,
}

/// The staged, uncommitted set of mutations awaiting one atomic commit.
pub struct WriteBatch {
    store: OperationStore,
    config: BatchConfig,
    dispose_after_commit: bool,
    disposed: bool,
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("trees", &self.store.trees().collect::<Vec<_>>())
            .field("total_size", &self.store.total_size())
            .field("dispose_after_commit", &self.dispose_after_commit)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::with_config(BatchConfig::default())
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self {
            store: OperationStore::default(),
            dispose_after_commit: config.dispose_after_commit,
            config,
            disposed: false,
        }
    }

    /// Stages an Add. The value is either in-memory bytes or a stream (see
    /// [`Value::stream`]); streams longer than the configured ceiling are
    /// rejected. With `ignore_concurrency_conflicts`, the executor skips
    /// this operation instead of failing the commit on a version mismatch.
    pub fn add(
        &mut self,
        key: impl Into<Slice>,
        value: impl Into<Value>,
        tree_name: Option<&str>,
        version: Option<u16>,
        ignore_concurrency_conflicts: bool,
    ) -> Result<()> {
        self.ensure_live()?;
        let mut op = BatchOperation::add_with_limit(
            key.into(),
            value.into(),
            version,
            tree_name,
            self.config.max_stream_len,
        )
        .inspect_err(|e| debug!(tree = ?tree_name, error = %e, "rejected add"))?;
        if ignore_concurrency_conflicts {
            op.ignore(ErrorKind::ConcurrencyConflict);
        }
        self.store.route(op);
        Ok(())
    }

    pub fn delete(
        &mut self,
        key: impl Into<Slice>,
        tree_name: Option<&str>,
        version: Option<u16>,
    ) -> Result<()> {
        self.ensure_live()?;
        let op = BatchOperation::delete(key.into(), version, tree_name)
            .inspect_err(|e| debug!(tree = ?tree_name, error = %e, "rejected delete"))?;
        self.store.route(op);
        Ok(())
    }

    /// Stages a MultiAdd. Multi-values are always in memory and non-empty.
    pub fn multi_add(
        &mut self,
        key: impl Into<Slice>,
        value: impl Into<Slice>,
        tree_name: Option<&str>,
        version: Option<u16>,
    ) -> Result<()> {
        self.ensure_live()?;
        let op = BatchOperation::multi_add(key.into(), value.into(), version, tree_name)
            .inspect_err(|e| debug!(tree = ?tree_name, error = %e, "rejected multi_add"))?;
        self.store.route(op);
        Ok(())
    }

    pub fn multi_delete(
        &mut self,
        key: impl Into<Slice>,
        value: impl Into<Slice>,
        tree_name: Option<&str>,
        version: Option<u16>,
    ) -> Result<()> {
        self.ensure_live()?;
        let op = BatchOperation::multi_delete(key.into(), value.into(), version, tree_name)
            .inspect_err(|e| debug!(tree = ?tree_name, error = %e, "rejected multi_delete"))?;
        self.store.route(op);
        Ok(())
    }

    pub fn increment(
        &mut self,
        key: impl Into<Slice>,
        delta: i64,
        tree_name: Option<&str>,
        version: Option<u16>,
    ) -> Result<()> {
        self.ensure_live()?;
        let op = BatchOperation::increment(key.into(), delta, version, tree_name)
            .inspect_err(|e| debug!(tree = ?tree_name, error = %e, "rejected increment"))?;
        self.store.route(op);
        Ok(())
    }

    /// True iff nothing is staged. A batch of deletions is not empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Sum of key bytes over every staged operation, plus value bytes for
    /// Add, MultiAdd and MultiDelete. Increments count their key only.
    #[must_use]
    pub fn total_size(&self) -> i64 {
        self.store.total_size()
    }

    /// Read-your-writes lookup of a pending operation.
    ///
    /// A key with any multi-value operation is reported as present with kind
    /// [`OperationKind::None`] and [`PendingValue::Unresolved`]: a multi-valued
    /// key has no single current value. Otherwise the last-write operation is
    /// returned; a streamed value is rewound first.
    pub fn try_get_pending(&mut self, tree_name: Option<&str>, key: &[u8]) -> Option<Pending<'_>> {
        if self.store.has_multi(tree_name, key) {
            return Some(Pending {
                kind: OperationKind::None,
                version: None,
                value: PendingValue::Unresolved,
            });
        }

        let op = self.store.last_write_mut(tree_name, key)?;
        let kind = op.kind();
        let version = op.version();
        let value = match op.payload_mut() {
            Payload::Bytes(b) => PendingValue::Bytes(b.clone()),
            Payload::Stream(s) => {
                if let Err(e) = s.reset() {
                    warn!(error = %e, "failed to rewind staged stream for lookup");
                }
                PendingValue::Stream(s)
            }
            Payload::Delta(d) => PendingValue::Delta(*d),
            Payload::None => PendingValue::Deleted,
        };
        Some(Pending {
            kind,
            version,
            value,
        })
    }

    /// Every operation staged for `tree_name`, in commit order.
    ///
    /// Last-write operations come first, by key; multi-value operations
    /// follow, by key then value, with ties kept in call order. Each call
    /// returns a fresh iterator and the order is the same on every call.
    pub fn sorted_operations(&self, tree_name: Option<&str>) -> SortedOperations<'_> {
        self.store.sorted(tree_name)
    }

    /// Same order as [`WriteBatch::sorted_operations`], yielding mutable
    /// operations so streamed values can be read.
    pub fn sorted_operations_mut(&mut self, tree_name: Option<&str>) -> SortedOperationsMut<'_> {
        self.store.sorted_mut(tree_name)
    }

    /// Names of every tree that received an operation, in name order.
    pub fn trees(&self) -> impl Iterator<Item = &str> {
        self.store.trees()
    }

    /// Whether the executor should dispose the batch after a successful commit.
    #[must_use]
    pub fn dispose_after_commit(&self) -> bool {
        self.dispose_after_commit
    }

    pub fn set_dispose_after_commit(&mut self, dispose: bool) {
        self.dispose_after_commit = dispose;
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases every held value stream and clears the batch. Calling it
    /// again is a no-op; staging afterwards fails with [`BatchError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let released = self.store.clear();
        debug!(released_streams = released, "write batch disposed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(BatchError::Disposed);
        }
        Ok(())
    }
}

impl Drop for WriteBatch {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests;

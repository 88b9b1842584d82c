/// Write path: `commit()`.
///
/// A commit walks every registered tree of the batch in commit order and
/// turns each staged operation into a WAL record, checking expected versions
/// and multi-value membership against committed state plus the effects of
/// operations earlier in the same commit. A failed check aborts the whole
/// commit unless the operation lists that error kind as ignorable, in which
/// case only that operation is dropped.
use anyhow::{Context, Result};
use batch::{BatchOperation, OperationKind, Payload, WriteBatch};
use memtable::{next_version, TreeTable};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use wal::WalRecord;

use crate::recovery::apply_record;
use crate::{CommitError, Engine};

/// Outcome of a successful [`Engine::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    /// Sequence number the batch was journaled under (unchanged for an empty batch).
    pub seq: u64,
    pub applied: usize,
    /// Operations dropped because they ignored the error they hit.
    pub skipped: usize,
}

/// Committed state of one tree, overlaid with this commit's earlier effects.
struct TreeOverlay<'a> {
    base: Option<&'a TreeTable>,
    versions: HashMap<Vec<u8>, u16>,
    members: HashMap<(Vec<u8>, Vec<u8>), bool>,
}

impl<'a> TreeOverlay<'a> {
    fn new(base: Option<&'a TreeTable>) -> Self {
        Self {
            base,
            versions: HashMap::new(),
            members: HashMap::new(),
        }
    }

    fn version_of(&self, key: &[u8]) -> u16 {
        match self.versions.get(key) {
            Some(v) => *v,
            None => self.base.map_or(0, |t| t.version_of(key)),
        }
    }

    fn has_member(&self, key: &[u8], value: &[u8]) -> bool {
        match self.members.get(&(key.to_vec(), value.to_vec())) {
            Some(present) => *present,
            None => self.base.is_some_and(|t| t.contains_multi(key, value)),
        }
    }

    fn bump(&mut self, key: &[u8]) {
        let next = next_version(self.version_of(key));
        self.versions.insert(key.to_vec(), next);
    }
}

/// Raises `err` unless `op` ignores its kind. `Ok(true)` means skip `op`.
fn conflict(op: &BatchOperation, err: CommitError) -> Result<bool> {
    if op.ignores(err.kind()) {
        warn!(error = %err, "skipping operation with ignored error");
        return Ok(true);
    }
    Err(err.into())
}

/// Validates `op` and converts it into its WAL record. `Ok(None)` when the
/// operation is skipped.
fn plan(
    tree: &str,
    op: &mut BatchOperation,
    overlay: &mut TreeOverlay<'_>,
) -> Result<Option<WalRecord>> {
    let key = op.key().to_vec();

    if let Some(expected) = op.version() {
        let actual = overlay.version_of(&key);
        if actual != expected {
            let err = CommitError::Conflict {
                tree: tree.to_string(),
                key: key.clone(),
                expected,
                actual,
            };
            if conflict(op, err)? {
                return Ok(None);
            }
        }
    }

    let kind = op.kind();
    let tree = tree.to_string();
    let record = match (kind, op.payload_mut()) {
        (OperationKind::Add, Payload::Bytes(b)) => WalRecord::Add {
            tree,
            key,
            value: b.to_vec(),
        },
        (OperationKind::Add, Payload::Stream(s)) => {
            let value = s
                .read_all()
                .with_context(|| format!("failed to read staged value stream for {}", tree))?;
            WalRecord::Add { tree, key, value }
        }
        (OperationKind::Delete, _) => WalRecord::Delete { tree, key },
        (OperationKind::Increment, Payload::Delta(d)) => WalRecord::Increment {
            tree,
            key,
            delta: *d,
        },
        (OperationKind::MultiAdd, Payload::Bytes(b)) => WalRecord::MultiAdd {
            tree,
            key,
            value: b.to_vec(),
        },
        (OperationKind::MultiDelete, Payload::Bytes(b)) => WalRecord::MultiDelete {
            tree,
            key,
            value: b.to_vec(),
        },
        (kind, payload) => {
            anyhow::bail!("malformed staged operation: {:?} with {:?}", kind, payload)
        }
    };

    if let WalRecord::MultiDelete { tree, key, value } = &record {
        if !overlay.has_member(key, value) {
            let err = CommitError::MultiValueNotFound {
                tree: tree.clone(),
                key: key.clone(),
                value: value.clone(),
            };
            if conflict(op, err)? {
                return Ok(None);
            }
        }
    }

    match &record {
        WalRecord::Add { key, .. } | WalRecord::Increment { key, .. } => overlay.bump(key),
        WalRecord::Delete { key, .. } => {
            overlay.versions.insert(key.clone(), 0);
        }
        WalRecord::MultiAdd { key, value, .. } => {
            overlay.members.insert((key.clone(), value.clone()), true);
        }
        WalRecord::MultiDelete { key, value, .. } => {
            overlay.members.insert((key.clone(), value.clone()), false);
        }
    }

    Ok(Some(record))
}

impl Engine {
    /// Applies `batch` atomically (the commit step).
    ///
    /// # Steps
    ///
    /// 1. An empty batch commits trivially without touching the WAL.
    /// 2. Every tree's operations are validated in commit order; streamed
    ///    values are rewound and read here.
    /// 3. All surviving records plus a commit marker are appended to the WAL.
    /// 4. The records are applied to the Memtable and the sequence number
    ///    advances.
    /// 5. The batch is disposed if its dispose-after-commit flag is set.
    ///
    /// # Errors
    ///
    /// A [`CommitError`] for a conflict the operation does not ignore, or an
    /// I/O error from a value stream or the WAL. Nothing is applied and the
    /// batch is left as it was.
    pub fn commit(&mut self, batch: &mut WriteBatch) -> Result<CommitSummary> {
        anyhow::ensure!(!batch.is_disposed(), "write batch already disposed");

        if batch.is_empty() {
            if batch.dispose_after_commit() {
                batch.dispose();
            }
            return Ok(CommitSummary {
                seq: self.seq,
                applied: 0,
                skipped: 0,
            });
        }

        let seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;

        let trees: Vec<String> = batch.trees().map(str::to_owned).collect();
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for tree in &trees {
            let mut overlay = TreeOverlay::new(self.mem.tree(tree));
            for op in batch.sorted_operations_mut(Some(tree)) {
                match plan(tree, op, &mut overlay)? {
                    Some(record) => records.push(record),
                    None => skipped += 1,
                }
            }
            debug!(tree = %tree, "validated tree");
        }

        // Append to WAL first
        self.wal_writer
            .append_batch(seq, &records)
            .context("failed to journal write batch")?;

        let applied = records.len();
        for record in records {
            apply_record(&mut self.mem, record);
        }
        self.seq = seq;

        info!(seq, applied, skipped, trees = trees.len(), "committed write batch");

        if batch.dispose_after_commit() {
            batch.dispose();
        }

        Ok(CommitSummary {
            seq,
            applied,
            skipped,
        })
    }
}

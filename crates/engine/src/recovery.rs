/// WAL replay logic.
///
/// This module handles the cold-start path: replaying every committed batch
/// in the WAL into a fresh memtable. The same `apply_record` is used by the
/// commit path, so replay reproduces versions exactly.
use anyhow::Result;
use memtable::Memtable;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{info, warn};
use wal::{WalReader, WalRecord};

/// Replays a WAL file into the given memtable, returning the highest sequence
/// number encountered (including that of a torn, uncommitted batch, so the
/// next commit never reuses it).
///
/// If the WAL file does not exist, returns `Ok(0)` (fresh start). A torn
/// tail is cut off the file so later appends start on a frame boundary.
///
/// # Errors
///
/// Propagates any I/O or corruption error from [`WalReader::replay`].
pub fn replay_wal_and_build<P: AsRef<Path>>(path: P, mem: &mut Memtable) -> Result<u64> {
    match WalReader::open(path.as_ref()) {
        Ok(mut reader) => {
            let mut batches = 0usize;
            let max_seq = reader.replay(|_seq, records| {
                batches += 1;
                for record in records {
                    apply_record(mem, record);
                }
            })?;
            info!(batches, max_seq, "replayed WAL");
            truncate_torn_tail(path.as_ref(), reader.committed_len())?;
            Ok(max_seq)
        }
        Err(e) => {
            // File doesn't exist yet -> fresh start
            if matches!(e, wal::WalError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
            {
                Ok(0)
            } else {
                Err(anyhow::anyhow!(e).context("failed to open WAL for replay"))
            }
        }
    }
}

fn truncate_torn_tail(path: &Path, committed_len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    if len > committed_len {
        warn!(dropped = len - committed_len, "truncating torn WAL tail");
        file.set_len(committed_len)?;
        file.sync_all()?;
    }
    Ok(())
}

/// Applies one journaled operation to its tree.
pub(crate) fn apply_record(mem: &mut Memtable, record: WalRecord) {
    match record {
        WalRecord::Add { tree, key, value } => {
            mem.tree_mut(&tree).put(key, value);
        }
        WalRecord::Delete { tree, key } => {
            mem.tree_mut(&tree).delete(&key);
        }
        WalRecord::MultiAdd { tree, key, value } => {
            mem.tree_mut(&tree).multi_add(key, value);
        }
        WalRecord::MultiDelete { tree, key, value } => {
            mem.tree_mut(&tree).multi_delete(&key, &value);
        }
        WalRecord::Increment { tree, key, delta } => {
            mem.tree_mut(&tree).increment(key, delta);
        }
    }
}

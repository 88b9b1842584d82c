use super::*;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// -------------------- Helpers --------------------

/// In-memory stream that counts how many times it has been released.
struct TrackedStream {
    inner: Cursor<Vec<u8>>,
    released: Arc<AtomicUsize>,
}

impl TrackedStream {
    fn new(data: &[u8], released: &Arc<AtomicUsize>) -> Value {
        Value::stream(Self {
            inner: Cursor::new(data.to_vec()),
            released: Arc::clone(released),
        })
    }
}

impl Read for TrackedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for TrackedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stream that reports a length without backing storage. Reads yield zeros.
struct SparseStream {
    len: u64,
    pos: u64,
}

impl Read for SparseStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (self.len.saturating_sub(self.pos) as usize).min(buf.len());
        buf[..n].fill(0);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SparseStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::End(off) => (self.len as i64 + off) as u64,
            SeekFrom::Current(off) => (self.pos as i64 + off) as u64,
        };
        Ok(self.pos)
    }
}

fn keys_and_kinds(wb: &WriteBatch, tree: Option<&str>) -> Vec<(Vec<u8>, OperationKind)> {
    wb.sorted_operations(tree)
        .map(|op| (op.key().to_vec(), op.kind()))
        .collect()
}

// -------------------- Last writer wins --------------------

#[test]
fn add_then_delete_yields_single_delete() {
    let mut wb = WriteBatch::new();
    wb.add("a", "x", Some("T"), None, false).unwrap();
    wb.delete("a", Some("T"), None).unwrap();

    assert_eq!(
        keys_and_kinds(&wb, Some("T")),
        vec![(b"a".to_vec(), OperationKind::Delete)]
    );
}

#[test]
fn last_call_wins_across_kinds() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v1", Some("T"), None, false).unwrap();
    wb.increment("k", 3, Some("T"), None).unwrap();
    wb.delete("k", Some("T"), None).unwrap();
    wb.add("k", "v2", Some("T"), None, false).unwrap();

    let ops: Vec<_> = wb.sorted_operations(Some("T")).collect();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind(), OperationKind::Add);
    assert_eq!(ops[0].value_bytes(), Some(&Slice::from("v2")));
}

#[test]
fn last_write_ops_sorted_by_key() {
    let mut wb = WriteBatch::new();
    for k in ["m", "c", "x", "a"] {
        wb.add(k, "v", Some("T"), None, false).unwrap();
    }
    let keys: Vec<_> = keys_and_kinds(&wb, Some("T")).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"m".to_vec(), b"x".to_vec()]);
}

#[test]
fn trees_are_independent() {
    let mut wb = WriteBatch::new();
    wb.add("k", "one", Some("T1"), None, false).unwrap();
    wb.add("k", "two", Some("T2"), None, false).unwrap();

    assert_eq!(wb.sorted_operations(Some("T1")).count(), 1);
    assert_eq!(wb.sorted_operations(Some("T2")).count(), 1);
    assert_eq!(wb.sorted_operations(Some("T3")).count(), 0);
    assert_eq!(wb.trees().collect::<Vec<_>>(), vec!["T1", "T2"]);
}

// -------------------- Multi values --------------------

#[test]
fn multi_add_accumulates_sorted_by_value() {
    let mut wb = WriteBatch::new();
    wb.multi_add("k", "v2", Some("T"), None).unwrap();
    wb.multi_add("k", "v1", Some("T"), None).unwrap();

    let ops: Vec<_> = wb.sorted_operations(Some("T")).collect();
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| op.kind() == OperationKind::MultiAdd));
    assert_eq!(ops[0].value_bytes(), Some(&Slice::from("v1")));
    assert_eq!(ops[1].value_bytes(), Some(&Slice::from("v2")));
}

#[test]
fn multi_ties_keep_call_order() {
    let mut wb = WriteBatch::new();
    wb.multi_add("k", "v", Some("T"), None).unwrap();
    wb.multi_delete("k", "v", Some("T"), None).unwrap();
    wb.multi_add("k", "v", Some("T"), None).unwrap();

    let kinds: Vec<_> = keys_and_kinds(&wb, Some("T")).into_iter().map(|(_, k)| k).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::MultiAdd,
            OperationKind::MultiDelete,
            OperationKind::MultiAdd
        ]
    );
}

#[test]
fn last_write_ops_precede_multi_ops() {
    let mut wb = WriteBatch::new();
    wb.multi_add("a", "1", Some("T"), None).unwrap();
    wb.add("z", "v", Some("T"), None, false).unwrap();
    wb.multi_add("b", "0", Some("T"), None).unwrap();
    wb.delete("y", Some("T"), None).unwrap();

    assert_eq!(
        keys_and_kinds(&wb, Some("T")),
        vec![
            (b"y".to_vec(), OperationKind::Delete),
            (b"z".to_vec(), OperationKind::Add),
            (b"a".to_vec(), OperationKind::MultiAdd),
            (b"b".to_vec(), OperationKind::MultiAdd),
        ]
    );
}

#[test]
fn sorted_operations_stable_across_calls() {
    let mut wb = WriteBatch::new();
    for i in 0..50u32 {
        wb.add(format!("k{:03}", (i * 7) % 50), "v", Some("T"), None, false)
            .unwrap();
        wb.multi_add(format!("m{}", i % 5), format!("v{}", i), Some("T"), None)
            .unwrap();
    }
    let first = keys_and_kinds(&wb, Some("T"));
    let second = keys_and_kinds(&wb, Some("T"));
    assert_eq!(first.len(), 100);
    assert_eq!(first, second);
}

#[test]
fn sorted_operations_mut_matches_shared_order() {
    let mut wb = WriteBatch::new();
    wb.add("b", "2", None, None, false).unwrap();
    wb.add("a", "1", None, None, false).unwrap();
    wb.multi_add("c", "z", None, None).unwrap();
    wb.multi_add("c", "y", None, None).unwrap();

    let shared: Vec<_> = wb
        .sorted_operations(None)
        .map(|op| (op.key().clone(), op.value_bytes().cloned()))
        .collect();
    let exclusive: Vec<_> = wb
        .sorted_operations_mut(None)
        .map(|op| (op.key().clone(), op.value_bytes().cloned()))
        .collect();
    assert_eq!(shared, exclusive);
}

// -------------------- Tree names --------------------

#[test]
fn none_tree_is_root() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v", None, None, false).unwrap();
    wb.add("k", "w", Some(slice::ROOT_TREE_NAME), None, false).unwrap();

    let ops: Vec<_> = wb.sorted_operations(None).collect();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].tree_name(), Some(slice::ROOT_TREE_NAME));
    assert_eq!(ops[0].value_bytes(), Some(&Slice::from("w")));
    assert_eq!(wb.trees().collect::<Vec<_>>(), vec![slice::ROOT_TREE_NAME]);
}

#[test]
fn empty_tree_name_rejected_everywhere() {
    let mut wb = WriteBatch::new();
    let results = [
        wb.add("k", "v", Some(""), None, false),
        wb.delete("k", Some(""), None),
        wb.multi_add("k", "v", Some(""), None),
        wb.multi_delete("k", "v", Some(""), None),
        wb.increment("k", 1, Some(""), None),
    ];
    for r in results {
        assert!(matches!(r, Err(BatchError::InvalidArgument(_))));
    }
    assert!(wb.is_empty());
    assert_eq!(wb.trees().count(), 0);
}

// -------------------- Validation --------------------

#[test]
fn oversized_stream_rejected_before_staging() {
    let mut wb = WriteBatch::new();
    let stream = Value::stream(SparseStream {
        len: 1u64 << 31,
        pos: 0,
    });
    let err = wb.add("big", stream, Some("T"), None, false).unwrap_err();
    assert!(matches!(err, BatchError::InvalidArgument(_)));
    assert!(wb.is_empty());
}

#[test]
fn stream_at_ceiling_accepted() {
    let mut wb = WriteBatch::new();
    let stream = Value::stream(SparseStream {
        len: (1u64 << 31) - 1,
        pos: 0,
    });
    wb.add("big", stream, Some("T"), None, false).unwrap();
    assert_eq!(wb.total_size(), (1i64 << 31) - 1 + 3);
}

#[test]
fn configured_stream_ceiling_applies() {
    let mut wb = WriteBatch::with_config(config::BatchConfig {
        max_stream_len: 4,
        dispose_after_commit: true,
    });
    let err = wb
        .add("k", Value::stream(Cursor::new(vec![0u8; 5])), None, None, false)
        .unwrap_err();
    assert!(matches!(err, BatchError::InvalidArgument(_)));
    wb.add("k", Value::stream(Cursor::new(vec![0u8; 4])), None, None, false)
        .unwrap();
}

#[test]
fn failed_call_leaves_batch_usable() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v", Some("T"), None, false).unwrap();
    assert!(wb.multi_add("m", "", Some("T"), None).is_err());
    wb.multi_add("m", "x", Some("T"), None).unwrap();
    assert_eq!(wb.sorted_operations(Some("T")).count(), 2);
}

// -------------------- Versions and ignore sets --------------------

#[test]
fn version_chain_collapses_to_pre_batch_version() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v1", Some("T"), Some(5), false).unwrap();
    wb.add("k", "v2", Some("T"), Some(6), false).unwrap();

    let op = wb.sorted_operations(Some("T")).next().unwrap();
    assert_eq!(op.version(), Some(5));
}

#[test]
fn version_chain_follows_through_three_writes() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v1", None, Some(5), false).unwrap();
    wb.add("k", "v2", None, Some(6), false).unwrap();
    // the staged op now expects 5, so 6 chains again
    wb.delete("k", None, Some(6)).unwrap();

    let op = wb.sorted_operations(None).next().unwrap();
    assert_eq!(op.kind(), OperationKind::Delete);
    assert_eq!(op.version(), Some(5));
}

#[test]
fn unrelated_version_kept() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v1", None, Some(5), false).unwrap();
    wb.add("k", "v2", None, Some(9), false).unwrap();
    assert_eq!(wb.sorted_operations(None).next().unwrap().version(), Some(9));
}

#[test]
fn ignore_concurrency_conflicts_marks_operation() {
    let mut wb = WriteBatch::new();
    wb.add("a", "v", None, Some(1), true).unwrap();
    wb.add("b", "v", None, Some(1), false).unwrap();

    let ops: Vec<_> = wb.sorted_operations(None).collect();
    assert!(ops[0].ignores(ErrorKind::ConcurrencyConflict));
    assert!(!ops[1].ignores(ErrorKind::ConcurrencyConflict));
}

// -------------------- Size and emptiness --------------------

#[test]
fn is_empty_transitions() {
    let mut wb = WriteBatch::new();
    assert!(wb.is_empty());
    wb.delete("gone", None, None).unwrap();
    assert!(!wb.is_empty());

    let mut wb = WriteBatch::new();
    wb.multi_delete("k", "v", None, None).unwrap();
    assert!(!wb.is_empty());
}

#[test]
fn total_size_accounting() {
    let mut wb = WriteBatch::new();
    assert_eq!(wb.total_size(), 0);

    wb.add("key", "value", None, None, false).unwrap(); // 3 + 5
    wb.delete("del", None, None).unwrap(); // 3
    wb.increment("ctr", 100, None, None).unwrap(); // 3
    wb.multi_add("mk", "abc", None, None).unwrap(); // 2 + 3
    wb.multi_delete("mk", "z", None, None).unwrap(); // 2 + 1
    assert_eq!(wb.total_size(), 8 + 3 + 3 + 5 + 3);
}

#[test]
fn total_size_reflects_overwrite() {
    let mut wb = WriteBatch::new();
    wb.add("key", "a-long-value", None, None, false).unwrap();
    assert_eq!(wb.total_size(), 3 + 12);
    wb.add("key", "v", None, None, false).unwrap();
    assert_eq!(wb.total_size(), 3 + 1);
    wb.delete("key", None, None).unwrap();
    assert_eq!(wb.total_size(), 3);
}

#[test]
fn total_size_counts_stream_length() {
    let mut wb = WriteBatch::new();
    wb.add("s", Value::stream(Cursor::new(vec![1u8; 100])), None, None, false)
        .unwrap();
    assert_eq!(wb.total_size(), 101);
}

// -------------------- Pending lookups --------------------

#[test]
fn pending_lookup_in_memory_value() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v", Some("T"), Some(3), false).unwrap();

    let p = wb.try_get_pending(Some("T"), b"k").unwrap();
    assert_eq!(p.kind, OperationKind::Add);
    assert_eq!(p.version, Some(3));
    assert!(matches!(p.value, PendingValue::Bytes(ref b) if b.as_bytes() == b"v"));

    assert!(wb.try_get_pending(Some("T"), b"missing").is_none());
    assert!(wb.try_get_pending(Some("other"), b"k").is_none());
}

#[test]
fn pending_lookup_delete_and_increment() {
    let mut wb = WriteBatch::new();
    wb.delete("d", None, None).unwrap();
    wb.increment("i", -4, None, None).unwrap();

    let p = wb.try_get_pending(None, b"d").unwrap();
    assert_eq!(p.kind, OperationKind::Delete);
    assert!(matches!(p.value, PendingValue::Deleted));

    let p = wb.try_get_pending(None, b"i").unwrap();
    assert_eq!(p.kind, OperationKind::Increment);
    assert!(matches!(p.value, PendingValue::Delta(-4)));
}

#[test]
fn pending_lookup_rewinds_stream() {
    let mut wb = WriteBatch::new();
    wb.add("s", Value::stream(Cursor::new(b"payload".to_vec())), None, None, false)
        .unwrap();

    for _ in 0..2 {
        let p = wb.try_get_pending(None, b"s").unwrap();
        let PendingValue::Stream(stream) = p.value else {
            panic!("expected stream");
        };
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }
}

#[test]
fn pending_lookup_multi_value_is_unresolved() {
    let mut wb = WriteBatch::new();
    wb.add("k", "v", None, None, false).unwrap();
    wb.multi_add("k", "m", None, None).unwrap();

    let p = wb.try_get_pending(None, b"k").unwrap();
    assert_eq!(p.kind, OperationKind::None);
    assert_eq!(p.version, None);
    assert!(matches!(p.value, PendingValue::Unresolved));
}

// -------------------- Stream release --------------------

#[test]
fn superseded_stream_released_immediately() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut wb = WriteBatch::new();
    wb.add("k", TrackedStream::new(b"one", &released), None, None, false)
        .unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 0);

    wb.delete("k", None, None).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn dispose_releases_each_stream_once() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut wb = WriteBatch::new();
    wb.add("a", TrackedStream::new(b"1", &released), Some("T1"), None, false)
        .unwrap();
    wb.add("b", TrackedStream::new(b"2", &released), Some("T2"), None, false)
        .unwrap();
    wb.add("c", "in-memory", Some("T2"), None, false).unwrap();

    wb.dispose();
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert!(wb.is_empty());
    assert!(wb.is_disposed());

    wb.dispose();
    drop(wb);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn dispose_without_streams() {
    let mut wb = WriteBatch::new();
    wb.dispose();
    assert!(wb.is_disposed());

    let mut wb = WriteBatch::new();
    wb.multi_add("k", "v", None, None).unwrap();
    wb.dispose();
    assert!(wb.is_empty());
}

#[test]
fn drop_releases_streams() {
    let released = Arc::new(AtomicUsize::new(0));
    {
        let mut wb = WriteBatch::new();
        wb.add("a", TrackedStream::new(b"1", &released), None, None, false)
            .unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn rejected_stream_is_released() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut wb = WriteBatch::with_config(config::BatchConfig {
        max_stream_len: 1,
        dispose_after_commit: true,
    });
    assert!(wb
        .add("a", TrackedStream::new(b"too long", &released), None, None, false)
        .is_err());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn staging_after_dispose_fails() {
    let mut wb = WriteBatch::new();
    wb.dispose();
    assert!(matches!(
        wb.add("k", "v", None, None, false),
        Err(BatchError::Disposed)
    ));
    assert!(wb.is_empty());
}

#[test]
fn dispose_after_commit_flag() {
    let mut wb = WriteBatch::new();
    assert!(wb.dispose_after_commit());
    wb.set_dispose_after_commit(false);
    assert!(!wb.dispose_after_commit());

    let wb = WriteBatch::with_config(config::BatchConfig {
        max_stream_len: 10,
        dispose_after_commit: false,
    });
    assert!(!wb.dispose_after_commit());
}

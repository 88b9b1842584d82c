//! Operation store: the two per-tree maps behind a [`crate::WriteBatch`].
//!
//! Both maps are plain hash maps in insertion order; nothing is sorted until
//! an executor asks for [`SortedOperations`]. Every mutation enters through
//! [`OperationStore::route`], the only place an absent tree name is resolved
//! to [`ROOT_TREE_NAME`].

use slice::{compare, Slice, ROOT_TREE_NAME};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

use crate::operation::{BatchOperation, OperationKind};

type LastWrite = HashMap<Slice, BatchOperation>;
type MultiValues = HashMap<Slice, Vec<BatchOperation>>;

#[derive(Debug, Default)]
pub(crate) struct OperationStore {
    /// tree -> key -> latest Add / Delete / Increment.
    last_write: HashMap<String, LastWrite>,
    /// tree -> key -> every MultiAdd / MultiDelete, in call order.
    multi_values: HashMap<String, MultiValues>,
    /// Every tree that has received at least one operation.
    trees: BTreeSet<String>,
}

fn tree_or_root(tree_name: Option<&str>) -> &str {
    tree_name.unwrap_or(ROOT_TREE_NAME)
}

impl OperationStore {
    pub(crate) fn route(&mut self, mut op: BatchOperation) {
        let tree = op.normalize_tree().to_owned();
        if !self.trees.contains(&tree) {
            self.trees.insert(tree.clone());
        }

        match op.kind() {
            OperationKind::MultiAdd | OperationKind::MultiDelete => {
                self.multi_values
                    .entry(tree)
                    .or_default()
                    .entry(op.key().clone())
                    .or_default()
                    .push(op);
            }
            _ => {
                let ops = self.last_write.entry(tree).or_default();
                match ops.entry(op.key().clone()) {
                    Entry::Occupied(mut slot) => {
                        op.chain_version_from(slot.get());
                        let replaced = slot.insert(op);
                        if replaced.holds_stream() {
                            trace!(key = ?replaced.key(), "releasing superseded value stream");
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(op);
                    }
                }
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.last_write.is_empty() && self.multi_values.is_empty()
    }

    pub(crate) fn total_size(&self) -> i64 {
        let last: i64 = self
            .last_write
            .values()
            .flat_map(|ops| ops.values())
            .map(BatchOperation::staged_size)
            .sum();
        let multi: i64 = self
            .multi_values
            .values()
            .flat_map(|ops| ops.values())
            .flatten()
            .map(BatchOperation::staged_size)
            .sum();
        last + multi
    }

    pub(crate) fn trees(&self) -> impl Iterator<Item = &str> {
        self.trees.iter().map(String::as_str)
    }

    pub(crate) fn has_multi(&self, tree_name: Option<&str>, key: &[u8]) -> bool {
        self.multi_values
            .get(tree_or_root(tree_name))
            .is_some_and(|ops| ops.contains_key(key))
    }

    pub(crate) fn last_write_mut(
        &mut self,
        tree_name: Option<&str>,
        key: &[u8],
    ) -> Option<&mut BatchOperation> {
        self.last_write
            .get_mut(tree_or_root(tree_name))
            .and_then(|ops| ops.get_mut(key))
    }

    pub(crate) fn sorted(&self, tree_name: Option<&str>) -> SortedOperations<'_> {
        let tree = tree_or_root(tree_name);
        SortedOperations {
            last_write: self.last_write.get(tree),
            multi_values: self.multi_values.get(tree),
            current: Vec::new().into_iter(),
        }
    }

    pub(crate) fn sorted_mut(&mut self, tree_name: Option<&str>) -> SortedOperationsMut<'_> {
        let tree = tree_or_root(tree_name);
        SortedOperationsMut {
            last_write: self.last_write.get_mut(tree),
            multi_values: self.multi_values.get_mut(tree),
            current: Vec::new().into_iter(),
        }
    }

    /// Drops every staged operation. Returns how many value streams were
    /// released; only the last-write map can hold streams.
    pub(crate) fn clear(&mut self) -> usize {
        let mut released = 0;
        for (_, ops) in self.last_write.drain() {
            for (_, op) in ops {
                if op.holds_stream() {
                    released += 1;
                }
            }
        }
        self.multi_values.clear();
        self.trees.clear();
        released
    }
}

/// Commit-order enumeration of one tree's staged operations.
///
/// Yields the tree's last-write operations by key, then its multi-value
/// operations by key and value (call order on ties). Each phase is sorted
/// only when the iterator reaches it.
pub struct SortedOperations<'a> {
    last_write: Option<&'a LastWrite>,
    multi_values: Option<&'a MultiValues>,
    current: std::vec::IntoIter<&'a BatchOperation>,
}

impl<'a> Iterator for SortedOperations<'a> {
    type Item = &'a BatchOperation;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(op) = self.current.next() {
                return Some(op);
            }
            if let Some(ops) = self.last_write.take() {
                let mut phase: Vec<_> = ops.values().collect();
                phase.sort_by(|a, b| compare(a.key(), b.key()));
                self.current = phase.into_iter();
                continue;
            }
            if let Some(ops) = self.multi_values.take() {
                // stable: equal entries share a key, so their Vec order is call order
                let mut phase: Vec<_> = ops.values().flatten().collect();
                phase.sort_by(|a, b| a.cmp_for_commit(b));
                self.current = phase.into_iter();
                continue;
            }
            return None;
        }
    }
}

/// Mutable counterpart of [`SortedOperations`], same order. Lets an executor
/// rewind and read streamed payloads while it walks the batch.
pub struct SortedOperationsMut<'a> {
    last_write: Option<&'a mut LastWrite>,
    multi_values: Option<&'a mut MultiValues>,
    current: std::vec::IntoIter<&'a mut BatchOperation>,
}

impl<'a> Iterator for SortedOperationsMut<'a> {
    type Item = &'a mut BatchOperation;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(op) = self.current.next() {
                return Some(op);
            }
            if let Some(ops) = self.last_write.take() {
                let mut phase: Vec<_> = ops.values_mut().collect();
                phase.sort_by(|a, b| compare(a.key(), b.key()));
                self.current = phase.into_iter();
                continue;
            }
            if let Some(ops) = self.multi_values.take() {
                let mut phase: Vec<_> = ops.values_mut().flatten().collect();
                phase.sort_by(|a, b| a.cmp_for_commit(b));
                self.current = phase.into_iter();
                continue;
            }
            return None;
        }
    }
}

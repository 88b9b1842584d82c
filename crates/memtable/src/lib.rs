use std::collections::{BTreeMap, BTreeSet, HashMap};

/// ValueEntry stores the current version and value of a key.
///
/// Versions start at 1 on the first write and advance by one on every later
/// write, wrapping from `u16::MAX` back to 1. An absent key has version 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub version: u16,
    pub value: Vec<u8>,
}

/// Version following `version`. Never 0, which marks an absent key.
pub fn next_version(version: u16) -> u16 {
    match version.wrapping_add(1) {
        0 => 1,
        v => v,
    }
}

/// One named tree: point values plus multi-valued keys.
#[derive(Debug, Default)]
pub struct TreeTable {
    values: BTreeMap<Vec<u8>, ValueEntry>,
    multi: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    approx_size: usize,
}

impl TreeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a key, bumping its version. Returns the new version.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> u16 {
        let version = match self.values.get(&key) {
            Some(old) => {
                self.approx_size = self.approx_size.saturating_sub(old.value.len());
                next_version(old.version)
            }
            None => {
                self.approx_size += key.len();
                1
            }
        };
        self.approx_size += value.len();
        self.values.insert(key, ValueEntry { version, value });
        version
    }

    /// Delete a key. Returns whether it existed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.values.remove(key) {
            Some(old) => {
                self.approx_size = self
                    .approx_size
                    .saturating_sub(key.len() + old.value.len());
                true
            }
            None => false,
        }
    }

    /// Adds `delta` to the key's counter (little-endian i64, missing = 0).
    /// Returns the new counter value.
    pub fn increment(&mut self, key: Vec<u8>, delta: i64) -> i64 {
        let current = self.counter(&key).unwrap_or(0);
        let next = current.wrapping_add(delta);
        self.put(key, next.to_le_bytes().to_vec());
        next
    }

    /// Reads a key as a counter. `None` if absent or not 8 bytes wide.
    pub fn counter(&self, key: &[u8]) -> Option<i64> {
        let entry = self.values.get(key)?;
        let bytes: [u8; 8] = entry.value.as_slice().try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }

    /// Returns `false` if the member was already present.
    pub fn multi_add(&mut self, key: Vec<u8>, value: Vec<u8>) -> bool {
        if !self.multi.contains_key(&key) {
            self.approx_size += key.len();
        }
        let set = self.multi.entry(key).or_default();
        let len = value.len();
        let added = set.insert(value);
        if added {
            self.approx_size += len;
        }
        added
    }

    /// Returns `false` if the member was not present.
    pub fn multi_delete(&mut self, key: &[u8], value: &[u8]) -> bool {
        let Some(set) = self.multi.get_mut(key) else {
            return false;
        };
        let removed = set.remove(value);
        if removed {
            self.approx_size = self.approx_size.saturating_sub(value.len());
        }
        if set.is_empty() {
            self.multi.remove(key);
            self.approx_size = self.approx_size.saturating_sub(key.len());
        }
        removed
    }

    pub fn contains_multi(&self, key: &[u8], value: &[u8]) -> bool {
        self.multi.get(key).is_some_and(|s| s.contains(value))
    }

    /// Members of a multi-valued key in ascending byte order.
    pub fn multi_values(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.multi
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &[u8]) -> Option<(u16, Vec<u8>)> {
        self.values
            .get(key)
            .map(|e| (e.version, e.value.clone()))
    }

    /// Current version of a key, 0 when absent.
    pub fn version_of(&self, key: &[u8]) -> u16 {
        self.values.get(key).map_or(0, |e| e.version)
    }

    /// Ordered iterator over point entries (key, ValueEntry)
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.multi.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }
}

/// All trees of the store, keyed by name.
#[derive(Debug, Default)]
pub struct Memtable {
    trees: HashMap<String, TreeTable>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self, name: &str) -> Option<&TreeTable> {
        self.trees.get(name)
    }

    /// Returns the named tree, creating it on first use.
    pub fn tree_mut(&mut self, name: &str) -> &mut TreeTable {
        self.trees.entry(name.to_string()).or_default()
    }

    pub fn tree_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.trees.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, tree: &str, key: &[u8]) -> Option<(u16, Vec<u8>)> {
        self.tree(tree).and_then(|t| t.get(key))
    }

    pub fn version_of(&self, tree: &str, key: &[u8]) -> u16 {
        self.tree(tree).map_or(0, |t| t.version_of(key))
    }

    pub fn approx_size(&self) -> usize {
        self.trees.values().map(TreeTable::approx_size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.values().all(TreeTable::is_empty)
    }
}

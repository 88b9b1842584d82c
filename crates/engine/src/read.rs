/// Read path over committed state.
///
/// `None` as a tree name means the root tree, the same as when staging.
use slice::ROOT_TREE_NAME;

use crate::Engine;

fn tree_or_root(tree_name: Option<&str>) -> &str {
    tree_name.unwrap_or(ROOT_TREE_NAME)
}

impl Engine {
    /// Looks up a key, returning `Some((version, value))` if present.
    #[must_use]
    pub fn get(&self, tree_name: Option<&str>, key: &[u8]) -> Option<(u16, Vec<u8>)> {
        self.mem.get(tree_or_root(tree_name), key)
    }

    /// Committed version of a key; 0 if the key does not exist.
    #[must_use]
    pub fn version_of(&self, tree_name: Option<&str>, key: &[u8]) -> u16 {
        self.mem.version_of(tree_or_root(tree_name), key)
    }

    /// Members of a multi-valued key in ascending byte order.
    #[must_use]
    pub fn multi_values(&self, tree_name: Option<&str>, key: &[u8]) -> Vec<Vec<u8>> {
        self.mem
            .tree(tree_or_root(tree_name))
            .map(|t| t.multi_values(key))
            .unwrap_or_default()
    }

    /// Reads a key written by increments.
    #[must_use]
    pub fn counter(&self, tree_name: Option<&str>, key: &[u8]) -> Option<i64> {
        self.mem
            .tree(tree_or_root(tree_name))
            .and_then(|t| t.counter(key))
    }

    /// Names of every tree holding committed data.
    #[must_use]
    pub fn tree_names(&self) -> Vec<&str> {
        self.mem.tree_names()
    }
}

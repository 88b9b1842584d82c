//! # Slice - Immutable Byte References
//!
//! The value reference shared by every RiptideKV crate. A [`Slice`] is an
//! immutable, cheaply clonable byte sequence with a total order: two slices
//! compare equal iff they are byte-identical, and otherwise order
//! lexicographically by their bytes.
//!
//! ```rust
//! use slice::{compare, Slice};
//! use std::cmp::Ordering;
//!
//! let a = Slice::from("apple");
//! let b = Slice::from("banana");
//! assert_eq!(compare(&a, &b), Ordering::Less);
//! assert_eq!(a.size(), 5);
//! ```

use bytes::Bytes;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

/// Canonical name of the root tree. Operations staged without a tree name
/// land here.
pub const ROOT_TREE_NAME: &str = "$Root";

/// An immutable, totally ordered byte sequence.
///
/// Backed by [`Bytes`], so clones share the same allocation.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slice(Bytes);

impl Slice {
    /// Creates an empty slice.
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Number of bytes referenced by this slice.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copies the referenced bytes into an owned vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Total order over slices used everywhere a commit order is defined.
pub fn compare(a: &Slice, b: &Slice) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

impl Deref for Slice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Slice {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Slice {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl From<Vec<u8>> for Slice {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Slice {
    fn from(s: &'static [u8]) -> Self {
        Self(Bytes::from_static(s))
    }
}

impl<const N: usize> From<&'static [u8; N]> for Slice {
    fn from(s: &'static [u8; N]) -> Self {
        Self(Bytes::from_static(s))
    }
}

impl From<&str> for Slice {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Slice {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Slice({:?})", s),
            Err(_) => write!(f, "Slice({:02x?})", &self.0[..]),
        }
    }
}

//! A single staged mutation.
//!
//! A [`BatchOperation`] is immutable once built, except for its expected
//! version (rewritten at most once by version chaining) and the read cursor
//! of a streamed payload.

use config::DEFAULT_MAX_STREAM_LEN;
use slice::{compare, Slice, ROOT_TREE_NAME};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{BatchError, Result};

/// A seekable byte source staged as a value without being read.
pub trait ValueStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ValueStream for T {}

/// Merge semantics of a staged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Delete,
    MultiAdd,
    MultiDelete,
    Increment,
    /// Reported by lookups that cannot resolve a single kind (multi-valued keys).
    None,
}

/// Executor-side failure categories an operation may ask to have swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The expected version did not match the stored version.
    ConcurrencyConflict,
    /// A multi-delete named a value the key does not hold.
    MultiValueNotFound,
}

/// A value handed to [`crate::WriteBatch::add`].
pub enum Value {
    Bytes(Slice),
    Stream(Box<dyn ValueStream>),
}

impl Value {
    pub fn stream<S: ValueStream + 'static>(stream: S) -> Self {
        Value::Stream(Box::new(stream))
    }
}

impl From<Slice> for Value {
    fn from(s: Slice) -> Self {
        Value::Bytes(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Slice::from(s))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Slice::from(v))
    }
}

impl From<&'static [u8]> for Value {
    fn from(s: &'static [u8]) -> Self {
        Value::Bytes(Slice::from(s))
    }
}

impl From<Box<dyn ValueStream>> for Value {
    fn from(s: Box<dyn ValueStream>) -> Self {
        Value::Stream(s)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Value::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A staged stream together with the cursor position it was handed over at.
///
/// `len` is the number of bytes between `origin` and the end of the stream,
/// probed once at staging time. [`StreamValue::reset`] seeks back to
/// `origin`, so the value can be read any number of times before commit.
///
/// The batch owns the handle, not whatever it reads from: dropping a
/// `StreamValue` releases the handle only.
pub struct StreamValue {
    stream: Box<dyn ValueStream>,
    origin: u64,
    len: u64,
}

impl StreamValue {
    fn probe(mut stream: Box<dyn ValueStream>) -> io::Result<Self> {
        let origin = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(origin))?;
        Ok(Self {
            stream,
            origin,
            len: end.saturating_sub(origin),
        })
    }

    #[must_use]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Seeks the stream back to the position it was staged at.
    pub fn reset(&mut self) -> io::Result<()> {
        self.stream.seek(SeekFrom::Start(self.origin))?;
        Ok(())
    }

    /// Rewinds and reads the whole staged value into memory.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.reset()?;
        let mut buf = Vec::with_capacity(self.len as usize);
        self.stream.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for StreamValue {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl fmt::Debug for StreamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamValue")
            .field("origin", &self.origin)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// The value carried by an operation. Exactly one variant applies per kind.
#[derive(Debug)]
pub enum Payload {
    /// Delete.
    None,
    /// Add (in memory), MultiAdd, MultiDelete.
    Bytes(Slice),
    /// Add (streamed).
    Stream(StreamValue),
    /// Increment.
    Delta(i64),
}

/// A single staged mutation.
#[derive(Debug)]
pub struct BatchOperation {
    key: Slice,
    kind: OperationKind,
    payload: Payload,
    value_size: i64,
    tree_name: Option<String>,
    version: Option<u16>,
    ignored: BTreeSet<ErrorKind>,
}

/// Rejects `Some("")`; `None` means the root tree and is resolved later.
fn tree_name_arg(tree_name: Option<&str>) -> Result<Option<String>> {
    match tree_name {
        Some("") => Err(BatchError::InvalidArgument(
            "tree name must not be empty".into(),
        )),
        other => Ok(other.map(str::to_owned)),
    }
}

impl BatchOperation {
    fn new(
        key: Slice,
        kind: OperationKind,
        payload: Payload,
        version: Option<u16>,
        tree_name: Option<String>,
    ) -> Self {
        let value_size = match &payload {
            Payload::Bytes(b) => b.size() as i64,
            Payload::Stream(s) => s.len() as i64,
            Payload::None | Payload::Delta(_) => 0,
        };
        Self {
            key,
            kind,
            payload,
            value_size,
            tree_name,
            version,
            ignored: BTreeSet::new(),
        }
    }

    /// Builds an Add with the default stream ceiling.
    pub fn add(
        key: Slice,
        value: Value,
        version: Option<u16>,
        tree_name: Option<&str>,
    ) -> Result<Self> {
        Self::add_with_limit(key, value, version, tree_name, DEFAULT_MAX_STREAM_LEN)
    }

    /// Builds an Add, rejecting streams longer than `max_stream_len` bytes.
    pub fn add_with_limit(
        key: Slice,
        value: Value,
        version: Option<u16>,
        tree_name: Option<&str>,
        max_stream_len: u64,
    ) -> Result<Self> {
        let tree_name = tree_name_arg(tree_name)?;
        let payload = match value {
            Value::Bytes(b) => Payload::Bytes(b),
            Value::Stream(s) => {
                let stream = StreamValue::probe(s)?;
                if stream.len() > max_stream_len {
                    return Err(BatchError::InvalidArgument(format!(
                        "streamed value too large: {} bytes (max {})",
                        stream.len(),
                        max_stream_len
                    )));
                }
                Payload::Stream(stream)
            }
        };
        Ok(Self::new(key, OperationKind::Add, payload, version, tree_name))
    }

    pub fn delete(key: Slice, version: Option<u16>, tree_name: Option<&str>) -> Result<Self> {
        let tree_name = tree_name_arg(tree_name)?;
        Ok(Self::new(
            key,
            OperationKind::Delete,
            Payload::None,
            version,
            tree_name,
        ))
    }

    pub fn multi_add(
        key: Slice,
        value: Slice,
        version: Option<u16>,
        tree_name: Option<&str>,
    ) -> Result<Self> {
        Self::multi(OperationKind::MultiAdd, key, value, version, tree_name)
    }

    pub fn multi_delete(
        key: Slice,
        value: Slice,
        version: Option<u16>,
        tree_name: Option<&str>,
    ) -> Result<Self> {
        Self::multi(OperationKind::MultiDelete, key, value, version, tree_name)
    }

    fn multi(
        kind: OperationKind,
        key: Slice,
        value: Slice,
        version: Option<u16>,
        tree_name: Option<&str>,
    ) -> Result<Self> {
        let tree_name = tree_name_arg(tree_name)?;
        if value.is_empty() {
            return Err(BatchError::InvalidArgument(
                "multi-value must not be empty".into(),
            ));
        }
        Ok(Self::new(key, kind, Payload::Bytes(value), version, tree_name))
    }

    pub fn increment(
        key: Slice,
        delta: i64,
        version: Option<u16>,
        tree_name: Option<&str>,
    ) -> Result<Self> {
        let tree_name = tree_name_arg(tree_name)?;
        Ok(Self::new(
            key,
            OperationKind::Increment,
            Payload::Delta(delta),
            version,
            tree_name,
        ))
    }

    #[must_use]
    pub fn key(&self) -> &Slice {
        &self.key
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Byte length of the payload as computed at construction time.
    #[must_use]
    pub fn value_size(&self) -> i64 {
        self.value_size
    }

    /// The tree name as given by the caller, or the root tree once routed.
    #[must_use]
    pub fn tree_name(&self) -> Option<&str> {
        self.tree_name.as_deref()
    }

    #[must_use]
    pub fn version(&self) -> Option<u16> {
        self.version
    }

    /// In-memory value bytes, if any. Streams and deltas have none.
    #[must_use]
    pub fn value_bytes(&self) -> Option<&Slice> {
        match &self.payload {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn holds_stream(&self) -> bool {
        matches!(self.payload, Payload::Stream(_))
    }

    /// Contribution to the batch's total size: key bytes, plus value bytes for
    /// operations that stage bytes. Deletes and increments count the key only.
    #[must_use]
    pub fn staged_size(&self) -> i64 {
        let key = self.key.size() as i64;
        match self.kind {
            OperationKind::Add | OperationKind::MultiAdd | OperationKind::MultiDelete => {
                key + self.value_size
            }
            _ => key,
        }
    }

    /// Rewinds a streamed payload to its origin. No-op for anything else.
    pub fn reset(&mut self) -> io::Result<()> {
        match &mut self.payload {
            Payload::Stream(s) => s.reset(),
            _ => Ok(()),
        }
    }

    /// Asks the executor to swallow `kind` for this operation.
    pub fn ignore(&mut self, kind: ErrorKind) {
        self.ignored.insert(kind);
    }

    #[must_use]
    pub fn ignores(&self, kind: ErrorKind) -> bool {
        self.ignored.contains(&kind)
    }

    #[must_use]
    pub fn ignored_errors(&self) -> &BTreeSet<ErrorKind> {
        &self.ignored
    }

    /// Collapses an in-batch "expect N, then expect N+1" chain: if this
    /// operation expects exactly one more than `previous`, it now expects
    /// what `previous` expected.
    pub fn chain_version_from(&mut self, previous: &BatchOperation) {
        if let (Some(new), Some(old)) = (self.version, previous.version) {
            if old.checked_add(1) == Some(new) {
                self.version = Some(old);
            }
        }
    }

    /// Resolves an absent tree name to the root tree and returns the name.
    pub(crate) fn normalize_tree(&mut self) -> &str {
        self.tree_name
            .get_or_insert_with(|| ROOT_TREE_NAME.to_string())
            .as_str()
    }

    /// Commit order: key bytes first, then in-memory value bytes. An
    /// operation without an in-memory value sorts before one with a value.
    #[must_use]
    pub fn cmp_for_commit(&self, other: &Self) -> Ordering {
        compare(&self.key, &other.key).then_with(|| {
            match (self.value_bytes(), other.value_bytes()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => compare(a, b),
            }
        })
    }
}

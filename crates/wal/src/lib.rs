//! # WAL - Write-Ahead Log
//!
//! Durable journal for committed write batches.
//!
//! A commit appends one frame per applied operation followed by a `Commit`
//! frame, all sharing the batch's sequence number, in a single write. On
//! restart the WAL is replayed and only batches whose `Commit` frame made it
//! to disk are handed back; the operations of a torn batch are dropped.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body prefix: `[seq: u64][op: u8]`, then
//!
//! ```text
//! op 0 Add          [tree_len: u16][tree][key_len: u32][key][val_len: u32][value]
//! op 1 Delete       [tree_len: u16][tree][key_len: u32][key]
//! op 2 MultiAdd     [tree_len: u16][tree][key_len: u32][key][val_len: u32][value]
//! op 3 MultiDelete  [tree_len: u16][tree][key_len: u32][key][val_len: u32][value]
//! op 4 Increment    [tree_len: u16][tree][key_len: u32][key][delta: i64]
//! op 5 Commit       [count: u32]
//! ```
//!
//! `record_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalWriter, WalReader, WalRecord};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append_batch(1, &[WalRecord::Add {
//!     tree: "users".into(),
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }]).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|seq, recs| println!("{}: {:?}", seq, recs)).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

const OP_ADD: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_MULTI_ADD: u8 = 2;
const OP_MULTI_DELETE: u8 = 3;
const OP_INCREMENT: u8 = 4;
const OP_COMMIT: u8 = 5;

/// Largest accepted frame: a maximal streamed value plus headroom for headers.
const MAX_RECORD_SIZE: u32 = (1 << 31) + (1 << 20);

/// A single committed operation against a named tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Add {
        tree: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        tree: String,
        key: Vec<u8>,
    },
    MultiAdd {
        tree: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    MultiDelete {
        tree: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Increment {
        tree: String,
        key: Vec<u8>,
        delta: i64,
    },
}

impl WalRecord {
    pub fn tree(&self) -> &str {
        match self {
            WalRecord::Add { tree, .. }
            | WalRecord::Delete { tree, .. }
            | WalRecord::MultiAdd { tree, .. }
            | WalRecord::MultiDelete { tree, .. }
            | WalRecord::Increment { tree, .. } => tree,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Add { key, .. }
            | WalRecord::Delete { key, .. }
            | WalRecord::MultiAdd { key, .. }
            | WalRecord::MultiDelete { key, .. }
            | WalRecord::Increment { key, .. } => key,
        }
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation, contained an unknown op code, or a
    /// commit marker disagreed with the records before it.
    #[error("corrupt record")]
    Corrupt,

    /// An earlier append failed and could not be cut back.
    #[error("WAL writer poisoned by a failed append")]
    Poisoned,
}

fn invalid_input(msg: &'static str) -> WalError {
    WalError::Io(io::Error::new(io::ErrorKind::InvalidInput, msg))
}

/// Append-only WAL writer.
///
/// A batch is serialized into an in-memory buffer and written with a single
/// `write_all` call. When `sync` is `true`, every batch is followed by
/// `sync_all()` (fsync) before the call returns.
///
/// The writer remembers where its last complete batch ends. A failed append
/// is cut back to that point, and bytes found past it before the next append
/// are dropped, so every batch starts on a frame boundary.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
    /// File length after the last complete batch.
    len: u64,
    /// A failed append could not be cut back; the tail is unknown.
    poisoned: bool,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `sync` - if true, every `append_batch` call is followed by `fsync`.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sync,
            buf: Vec::with_capacity(256),
            len,
            poisoned: false,
        })
    }

    /// Appends every record of one committed batch followed by its commit
    /// marker. Either the whole batch replays or none of it does.
    ///
    /// On error nothing of this batch is left in the file. If that cannot be
    /// guaranteed the writer is poisoned and refuses every later append.
    pub fn append_batch(&mut self, seq: u64, records: &[WalRecord]) -> Result<(), WalError> {
        if self.poisoned {
            return Err(WalError::Poisoned);
        }
        let count = u32::try_from(records.len())
            .map_err(|_| invalid_input("too many records in one WAL batch"))?;

        // Reuse the internal buffer, clear but keep the allocation
        self.buf.clear();
        for record in records {
            encode_frame(&mut self.buf, seq, Frame::Op(record))?;
        }
        encode_frame(&mut self.buf, seq, Frame::Commit(count))?;

        self.trim_tail()?;

        // Single write call for the entire batch
        if let Err(e) = write_and_sync(&mut self.file, &self.buf, self.sync) {
            if self.file.set_len(self.len).is_err() {
                self.poisoned = true;
            }
            return Err(e.into());
        }

        self.len += self.buf.len() as u64;
        Ok(())
    }

    /// Drops bytes past the last complete batch, e.g. a partial write.
    fn trim_tail(&mut self) -> Result<(), WalError> {
        let on_disk = self.file.metadata()?.len();
        if on_disk > self.len {
            self.file.set_len(self.len)?;
        }
        Ok(())
    }
}

fn write_and_sync(file: &mut File, buf: &[u8], sync: bool) -> io::Result<()> {
    file.write_all(buf)?;
    file.flush()?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

/// Serializes one frame onto the end of `buf`.
///
/// Layout:
/// [record_len: u32 LE][crc32: u32 LE][body bytes...]
fn encode_frame(buf: &mut Vec<u8>, seq: u64, frame: Frame<&WalRecord>) -> Result<(), WalError> {
    let start = buf.len();
    // Reserve 8 bytes for the frame header (record_len + crc), filled later
    buf.extend_from_slice(&[0u8; 8]);
    buf.write_u64::<LittleEndian>(seq)?;

    match frame {
        Frame::Commit(count) => {
            buf.write_u8(OP_COMMIT)?;
            buf.write_u32::<LittleEndian>(count)?;
        }
        Frame::Op(record) => {
            let op = match record {
                WalRecord::Add { .. } => OP_ADD,
                WalRecord::Delete { .. } => OP_DELETE,
                WalRecord::MultiAdd { .. } => OP_MULTI_ADD,
                WalRecord::MultiDelete { .. } => OP_MULTI_DELETE,
                WalRecord::Increment { .. } => OP_INCREMENT,
            };
            buf.write_u8(op)?;

            let tree = record.tree().as_bytes();
            let tree_len =
                u16::try_from(tree.len()).map_err(|_| invalid_input("WAL tree name too long"))?;
            buf.write_u16::<LittleEndian>(tree_len)?;
            buf.extend_from_slice(tree);

            let key = record.key();
            buf.write_u32::<LittleEndian>(key.len() as u32)?;
            buf.extend_from_slice(key);

            match record {
                WalRecord::Add { value, .. }
                | WalRecord::MultiAdd { value, .. }
                | WalRecord::MultiDelete { value, .. } => {
                    buf.write_u32::<LittleEndian>(value.len() as u32)?;
                    buf.extend_from_slice(value);
                }
                WalRecord::Increment { delta, .. } => {
                    buf.write_i64::<LittleEndian>(*delta)?;
                }
                WalRecord::Delete { .. } => {}
            }
        }
    }

    // Body is buf[start + 8..]
    let body = &buf[start + 8..];

    let mut hasher = Crc32::new();
    hasher.update(body);
    let crc = hasher.finalize();

    // record_len = body.len() + 4 (CRC), must fit the frame cap
    let record_len = (body.len() as u64) + 4;
    if record_len > u64::from(MAX_RECORD_SIZE) {
        buf.truncate(start);
        return Err(invalid_input("WAL record too large"));
    }

    buf[start..start + 4].copy_from_slice(&(record_len as u32).to_le_bytes());
    buf[start + 4..start + 8].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Sequential WAL reader that yields committed batches.
///
/// Each frame's CRC32 is verified. A truncated tail frame (e.g., from a crash
/// mid-write) is treated as a clean EOF, and the operations of a batch whose
/// commit marker never arrived are discarded.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    /// Bytes consumed by complete frames so far.
    pos: u64,
    /// Offset just past the last commit marker replayed.
    committed_len: u64,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    ///
    /// Returns `WalError::Io` if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader::from_reader(f))
    }
}

/// One decoded or to-be-encoded frame: an operation or a batch's commit marker.
enum Frame<R> {
    Op(R),
    Commit(u32),
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            pos: 0,
            committed_len: 0,
        }
    }

    /// Length of the log prefix holding only committed batches. Anything
    /// past it after a `replay` is a torn tail.
    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    /// Replays every committed batch, calling `apply(seq, records)` once per
    /// batch in log order. Returns the highest sequence number seen in any
    /// frame, committed or not.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** or **truncated tail** -> `Ok(max_seq)`; an unfinished
    ///   batch at the end is dropped.
    /// - **CRC mismatch**, **unknown op code** or a commit marker whose
    ///   count disagrees with its batch -> `Err(WalError::Corrupt)`.
    /// - **I/O error** -> `Err(WalError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<u64, WalError>
    where
        F: FnMut(u64, Vec<WalRecord>),
    {
        let mut body = Vec::with_capacity(256);
        let mut pending: Vec<WalRecord> = Vec::new();
        let mut pending_seq = 0u64;
        let mut max_seq = 0u64;

        loop {
            let Some(seq_and_frame) = self.read_frame(&mut body)? else {
                return Ok(max_seq);
            };
            let (seq, frame) = seq_and_frame;
            max_seq = max_seq.max(seq);

            // a different seq means the previous batch never committed
            if !pending.is_empty() && pending_seq != seq {
                pending.clear();
            }
            pending_seq = seq;

            match frame {
                Frame::Op(record) => pending.push(record),
                Frame::Commit(count) => {
                    if count as usize != pending.len() {
                        return Err(WalError::Corrupt);
                    }
                    apply(seq, std::mem::take(&mut pending));
                    self.committed_len = self.pos;
                }
            }
        }
    }

    /// Reads and decodes one frame. `Ok(None)` on EOF or a truncated tail.
    fn read_frame(&mut self, body: &mut Vec<u8>) -> Result<Option<(u64, Frame<WalRecord>)>, WalError> {
        // read record_len
        let record_len = match self.rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(WalError::Io(e)),
        };

        // record_len includes CRC (4 bytes) but not itself
        if record_len <= 4 || record_len > MAX_RECORD_SIZE {
            return Err(WalError::Corrupt);
        }

        let crc = match self.rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(WalError::Io(e)),
        };

        // grow only with bytes actually present; the header may be garbage
        let body_len = u64::from(record_len - 4);
        body.clear();
        let n = (&mut self.rdr).take(body_len).read_to_end(body)?;
        if (n as u64) < body_len {
            // truncated tail, treat as EOF
            return Ok(None);
        }

        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != crc {
            return Err(WalError::Corrupt);
        }
        self.pos += 4 + u64::from(record_len);

        decode_body(body).map(Some)
    }
}

fn decode_body(body: &[u8]) -> Result<(u64, Frame<WalRecord>), WalError> {
    let body_len = body.len();
    let mut br = body;
    let seq = br.read_u64::<LittleEndian>().map_err(|_| WalError::Corrupt)?;
    let op = br.read_u8().map_err(|_| WalError::Corrupt)?;

    if op == OP_COMMIT {
        let count = br.read_u32::<LittleEndian>().map_err(|_| WalError::Corrupt)?;
        return Ok((seq, Frame::Commit(count)));
    }
    if op > OP_INCREMENT {
        return Err(WalError::Corrupt);
    }

    let tree_len = br.read_u16::<LittleEndian>().map_err(|_| WalError::Corrupt)? as usize;
    let tree = read_exact_vec(&mut br, tree_len, body_len)?;
    let tree = String::from_utf8(tree).map_err(|_| WalError::Corrupt)?;

    let key_len = br.read_u32::<LittleEndian>().map_err(|_| WalError::Corrupt)? as usize;
    let key = read_exact_vec(&mut br, key_len, body_len)?;

    let record = match op {
        OP_INCREMENT => {
            let delta = br.read_i64::<LittleEndian>().map_err(|_| WalError::Corrupt)?;
            WalRecord::Increment { tree, key, delta }
        }
        OP_DELETE => WalRecord::Delete { tree, key },
        _ => {
            let val_len = br.read_u32::<LittleEndian>().map_err(|_| WalError::Corrupt)? as usize;
            let value = read_exact_vec(&mut br, val_len, body_len)?;
            match op {
                OP_ADD => WalRecord::Add { tree, key, value },
                OP_MULTI_ADD => WalRecord::MultiAdd { tree, key, value },
                _ => WalRecord::MultiDelete { tree, key, value },
            }
        }
    };
    Ok((seq, Frame::Op(record)))
}

fn read_exact_vec(br: &mut &[u8], len: usize, body_len: usize) -> Result<Vec<u8>, WalError> {
    if len > body_len {
        return Err(WalError::Corrupt);
    }
    let mut out = vec![0u8; len];
    br.read_exact(&mut out).map_err(|_| WalError::Corrupt)?;
    Ok(out)
}

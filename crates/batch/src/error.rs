use std::io;

use thiserror::Error;

/// Errors raised synchronously by staging calls.
///
/// A failed call leaves the batch exactly as it was before the call.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Malformed caller input: empty tree name, empty multi-value, or a
    /// streamed value longer than the configured ceiling.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The value stream could not be probed for its position or length.
    #[error("value stream error: {0}")]
    Stream(#[from] io::Error),

    /// The batch was already disposed.
    #[error("write batch already disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, BatchError>;

use batch::ErrorKind;
use thiserror::Error;

/// Conflicts detected while validating a batch.
///
/// Returned inside `anyhow::Error`; callers can `downcast_ref::<CommitError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("concurrency conflict on {tree}/{key:?}: expected version {expected}, found {actual}")]
    Conflict {
        tree: String,
        key: Vec<u8>,
        expected: u16,
        actual: u16,
    },

    #[error("multi-value not found on {tree}/{key:?}")]
    MultiValueNotFound {
        tree: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
}

impl CommitError {
    /// The category an operation can list in its ignore set to skip this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommitError::Conflict { .. } => ErrorKind::ConcurrencyConflict,
            CommitError::MultiValueNotFound { .. } => ErrorKind::MultiValueNotFound,
        }
    }
}

use std::io;

use thiserror::Error;

use crate::cache::CacheError;
use crate::fragment::FragmentError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("segment i/o failed at offset {offset} after {completed} bytes")]
    Segment {
        offset: u64,
        completed: u64,
        #[source]
        source: io::Error,
    },

    #[error("offset {offset} is not covered by any segment")]
    OutOfRange { offset: u64, completed: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("payload not registered: {0}")]
    PayloadNotFound(String),

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),

    #[error("payload is not open")]
    NotOpen,

    #[error("payload is open read-only")]
    ReadOnly,

    #[error("payload has no segments")]
    NoSegment,

    #[error("range at {offset} of {length} bytes is not present")]
    RangeMissing { offset: u64, length: u64 },

    #[error("payload is already open")]
    AlreadyOpen,

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl StorageError {
    /// Bytes transferred before a multi-segment operation failed.
    pub fn completed(&self) -> Option<u64> {
        match self {
            StorageError::Segment { completed, .. } | StorageError::OutOfRange { completed, .. } => {
                Some(*completed)
            }
            _ => None,
        }
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) | StorageError::Segment { source: e, .. } => e,
            other => io::Error::other(other),
        }
    }
}

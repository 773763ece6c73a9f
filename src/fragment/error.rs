use thiserror::Error;

/// Errors raised by fragment bookkeeping.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FragmentError {
    /// The allocator could not provide another node.
    #[error("fragment pool exhausted")]
    OutOfMemory,

    /// The range ends past `u64::MAX`.
    #[error("range of {length} bytes at {offset} overflows")]
    Overflow { offset: u64, length: u64 },
}

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache is disabled")]
    Disabled,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("entry of {len} bytes exceeds cache maximum of {max} bytes")]
    EntryTooLarge { len: usize, max: usize },

    #[error("dirty entries present but no sink to flush them")]
    NoSink,

    #[error("failed to flush cache entry at offset {offset}")]
    Flush {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("{failed} cache entries could not be flushed")]
    FlushIncomplete { failed: usize },
}

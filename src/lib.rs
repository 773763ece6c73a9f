//! rbit-store - payload storage for BitTorrent downloads
//!
//! Keeps a download's bytes on disk while they trickle in out of order:
//! which byte ranges are still missing, how one logical payload maps onto
//! its files, a write-back cache in front of those files, and a ledger of
//! verified blocks that survives restarts.
//!
//! # Modules
//!
//! - [`fragment`] - Interval sets over byte ranges
//! - [`cache`] - Per-payload write-back cache
//! - [`ledger`] - Persisted block-completion state
//! - [`storage`] - Multi-file payloads, the payload registry and maintenance
//! - [`constants`] - Defaults and tuning parameters

pub mod cache;
pub mod constants;
pub mod fragment;
pub mod ledger;
pub mod storage;

pub use cache::{BufferPool, CacheConfig, CacheError, CacheSink, WriteBackCache};
pub use fragment::{Fragment, FragmentError, FragmentSet};
pub use ledger::{CompletionLedger, FileStatus, LedgerError, SharedLedger};
pub use storage::{
    DiskOpener, MaintenanceHandle, OpenRequest, PayloadAddressSpace, PayloadHandle,
    PayloadRegistry, SegmentInfo, StorageError, VirtualFile,
};

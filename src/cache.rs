//! Write-back caching for payload data.
//!
//! Writes to a payload land in a bounded, per-payload [`WriteBackCache`]
//! first and reach disk later, when the cache trims itself, when a range is
//! invalidated for reading or hashing, on the periodic sweep, or when the
//! payload is closed.
//!
//! # Overview
//!
//! - [`WriteBackCache`] - Offset-ordered, non-overlapping cache entries
//! - [`CacheSink`] - Where flushed entries are written
//! - [`CacheConfig`] - Size limits, block size and sweep interval
//! - [`BufferPool`] - Reusable entry buffers
//!
//! # Failure policy
//!
//! The cache fails closed. A flush that errors, or a flush that is needed
//! while no sink is attached, disables the cache permanently. A disabled
//! cache refuses new entries, so callers fall back to writing directly.
//!
//! # Examples
//!
//! ```
//! use rbit_store::cache::{CacheConfig, CacheSink, WriteBackCache};
//!
//! #[derive(Default)]
//! struct Disk(Vec<(u64, Vec<u8>)>);
//!
//! impl CacheSink for Disk {
//!     fn write_cache_data(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
//!         self.0.push((offset, data.to_vec()));
//!         Ok(())
//!     }
//!
//!     fn cache_disabled(&mut self, _disabled: bool) {}
//! }
//!
//! let mut disk = Disk::default();
//! let mut cache = WriteBackCache::new(CacheConfig::new(1024, 256));
//!
//! cache.add_cache_entry(b"hello", 0, 0, false, Some(&mut disk)).unwrap();
//!
//! let mut buf = [0u8; 5];
//! assert!(cache.get_cache_data(&mut buf, 0));
//! assert_eq!(&buf, b"hello");
//!
//! // Nothing reaches the sink until the entry is flushed.
//! assert!(disk.0.is_empty());
//! cache.write_cache(Some(&mut disk)).unwrap();
//! assert_eq!(disk.0, vec![(0, b"hello".to_vec())]);
//! ```

mod buffer_pool;
mod config;
mod error;
mod write_back;

pub use buffer_pool::BufferPool;
pub use config::CacheConfig;
pub use error::CacheError;
pub use write_back::{CacheEntry, CacheSink, CacheStats, WriteBackCache};

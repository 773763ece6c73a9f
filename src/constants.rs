//! Storage constants and tuning parameters.
//!
//! Defaults for the fragment allocator, the write-back cache, the
//! completion ledger and the maintenance timer. Most of them can be
//! overridden at runtime through [`CacheConfig`](crate::cache::CacheConfig)
//! and the registry builders.

use std::time::Duration;

// ============================================================================
// Fragment allocation
// ============================================================================

/// Number of fragment nodes reserved each time an allocator grows.
pub const FRAGMENT_POOL_CHUNK: usize = 2048;

// ============================================================================
// Write-back cache
// ============================================================================

/// Default upper bound on bytes held by one payload's cache.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 4 * 1024 * 1024;

/// Bytes freed below the maximum whenever the cache is trimmed, so that a
/// trim is not needed again on the very next insert.
pub const DEFAULT_CACHE_HEADROOM: usize = 1024 * 1024;

/// Dirty entries are flushed at least this often, even when the cache is not
/// under size pressure.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// Cadence of the periodic cache maintenance.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Block size assumed when a payload is opened without one.
pub const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024;

// ============================================================================
// Buffer pool
// ============================================================================

/// Number of recycled entry buffers kept by a [`BufferPool`](crate::cache::BufferPool).
pub const BUFFER_POOL_CAPACITY: usize = 64;

/// Capacity of a freshly allocated pool buffer (one BitTorrent request block).
pub const BUFFER_POOL_BLOCK_SIZE: usize = 16 * 1024;

// ============================================================================
// Completion ledger
// ============================================================================

/// Minimum spacing between two unforced ledger writes.
pub const LEDGER_WRITE_INTERVAL: Duration = Duration::from_secs(10);

/// Extension appended to the ledger name on disk.
pub const LEDGER_EXTENSION: &str = "dat";

/// Magic bytes at the start of every ledger file.
pub const LEDGER_MAGIC: &[u8; 4] = b"RBLG";

/// Current ledger format version.
pub const LEDGER_VERSION: u16 = 1;


use std::time::Duration;

use crate::constants::{
    CACHE_SWEEP_INTERVAL, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_HEADROOM, DEFAULT_CACHE_MAX_SIZE,
};

/// Tuning for one payload's [`WriteBackCache`](super::WriteBackCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on cached bytes.
    pub max_size: usize,
    /// A trim frees space until the cache is this far below `max_size`.
    pub headroom: usize,
    /// Payload block size, used to derive block numbers from offsets.
    pub block_size: u64,
    /// Dirty entries are flushed at least this often.
    pub sweep_interval: Duration,
    /// A cache created with `enabled = false` starts out disabled.
    pub enabled: bool,
}

impl CacheConfig {
    pub fn new(max_size: usize, headroom: usize) -> Self {
        Self {
            max_size,
            headroom: headroom.min(max_size),
            ..Self::default()
        }
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Size a trim brings the cache down to.
    pub fn low_watermark(&self) -> usize {
        self.max_size.saturating_sub(self.headroom)
    }

    /// Block containing `offset`.
    pub fn block_of(&self, offset: u64) -> u32 {
        (offset / self.block_size.max(1)) as u32
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CACHE_MAX_SIZE,
            headroom: DEFAULT_CACHE_HEADROOM,
            block_size: DEFAULT_BLOCK_SIZE,
            sweep_interval: CACHE_SWEEP_INTERVAL,
            enabled: true,
        }
    }
}
